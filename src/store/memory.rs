/*
 *
 *  *
 *  *      Copyright (c) 2018-2025, SnackCloud All rights reserved.
 *  *
 *  *   Redistribution and use in source and binary forms, with or without
 *  *   modification, are permitted provided that the following conditions are met:
 *  *
 *  *   Redistributions of source code must retain the above copyright notice,
 *  *   this list of conditions and the following disclaimer.
 *  *   Redistributions in binary form must reproduce the above copyright
 *  *   notice, this list of conditions and the following disclaimer in the
 *  *   documentation and/or other materials provided with the distribution.
 *  *   Neither the name of the www.snackcloud.cn developer nor the names of its
 *  *   contributors may be used to endorse or promote products derived from
 *  *   this software without specific prior written permission.
 *  *   Author: SnackCloud
 *  *
 *
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

use crate::errors::{LockError, LockResult};
use crate::scripts::LockScript;
use crate::store::{check_script_args, check_set_args, LockStore};

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process store with expiring keys.
///
/// Every primitive runs inside one critical section, which gives the same
/// atomicity the Lua scripts get on a Redis node. Expiry follows the tokio
/// clock so paused-time tests can move leases forward. The node can be made
/// unreachable or slow to exercise red lock failure paths.
pub struct MemoryStore {
    address: String,
    entries: Mutex<HashMap<String, Entry>>,
    unreachable: AtomicBool,
    latency: Mutex<Duration>,
}

impl MemoryStore {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            entries: Mutex::new(HashMap::new()),
            unreachable: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Delay applied before every primitive
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key, now);
        entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key, now);
        entries.get(key).map(|entry| entry.expires_at - now)
    }

    /// Writes a key unconditionally, as another client would
    pub fn insert(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Deletes a key behind the holder's back
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.is_live(now));
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
    }

    async fn round_trip(&self) -> LockResult<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            sleep(latency).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LockError::StoreUnavailable(format!(
                "connection refused: {}",
                self.address
            )));
        }
        Ok(())
    }

    fn check_and_delete(&self, key: &str, token: &str) -> i64 {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key, now);
        match entries.get(key) {
            Some(entry) if entry.value == token => {
                entries.remove(key);
                1
            }
            _ => 0,
        }
    }

    fn check_and_renew(&self, key: &str, token: &str, ttl_seconds: u64) -> i64 {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key, now);
        match entries.get_mut(key) {
            Some(entry) if entry.value == token => {
                entry.expires_at = now + Duration::from_secs(ttl_seconds);
                1
            }
            _ => 0,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    fn address(&self) -> &str {
        &self.address
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> LockResult<bool> {
        check_set_args(key, value, ttl_seconds)?;
        self.round_trip().await?;

        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, key, now);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(true)
    }

    async fn eval_script(
        &self,
        script: LockScript,
        keys: &[&str],
        args: &[String],
    ) -> LockResult<Option<i64>> {
        check_script_args(script, keys, args)?;
        self.round_trip().await?;

        let reply = match script {
            LockScript::CheckAndDelete => self.check_and_delete(keys[0], &args[0]),
            LockScript::CheckAndRenew => {
                let ttl_seconds = args[1].parse::<u64>().map_err(|_| {
                    LockError::InvalidArgument(format!("invalid expire seconds: {}", args[1]))
                })?;
                self.check_and_renew(keys[0], &args[0], ttl_seconds)
            }
        };
        Ok(Some(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_ex_expires() -> LockResult<()> {
        let store = MemoryStore::default();
        assert!(store.set_nx_ex("k", "a", 1).await?);
        assert!(!store.set_nx_ex("k", "b", 1).await?);
        assert_eq!(store.get("k").as_deref(), Some("a"));

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(store.get("k"), None);
        assert!(store.set_nx_ex("k", "b", 1).await?);
        assert_eq!(store.get("k").as_deref(), Some("b"));
        Ok(())
    }

    #[tokio::test]
    async fn test_check_and_delete_requires_token() -> LockResult<()> {
        let store = MemoryStore::default();
        store.set_nx_ex("k", "owner", 10).await?;

        let reply = store
            .eval_script(LockScript::CheckAndDelete, &["k"], &["intruder".to_string()])
            .await?;
        assert_eq!(reply, Some(0));
        assert_eq!(store.get("k").as_deref(), Some("owner"));

        let reply = store
            .eval_script(LockScript::CheckAndDelete, &["k"], &["owner".to_string()])
            .await?;
        assert_eq!(reply, Some(1));
        assert!(store.is_empty());

        let reply = store
            .eval_script(LockScript::CheckAndDelete, &["k"], &["owner".to_string()])
            .await?;
        assert_eq!(reply, Some(0));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_and_renew_requires_token() -> LockResult<()> {
        let store = MemoryStore::default();
        store.set_nx_ex("k", "owner", 2).await?;

        let renew = |token: &str| {
            vec![token.to_string(), "10".to_string()]
        };
        assert_eq!(
            store.eval_script(LockScript::CheckAndRenew, &["k"], &renew("intruder")).await?,
            Some(0)
        );
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(2)));

        assert_eq!(
            store.eval_script(LockScript::CheckAndRenew, &["k"], &renew("owner")).await?,
            Some(1)
        );
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(10)));

        // an expired key is never resurrected
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(
            store.eval_script(LockScript::CheckAndRenew, &["k"], &renew("owner")).await?,
            Some(0)
        );
        assert_eq!(store.get("k"), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_node_does_not_mutate() {
        let store = MemoryStore::new("10.0.0.3:6379");
        store.set_unreachable(true);
        assert!(matches!(
            store.set_nx_ex("k", "v", 1).await,
            Err(LockError::StoreUnavailable(_))
        ));
        store.set_unreachable(false);
        assert!(store.is_empty());
    }
}
