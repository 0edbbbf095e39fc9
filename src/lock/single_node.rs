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

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{LockConfig, NodeConfig};
use crate::errors::{LockError, LockResult};
use crate::lock::watchdog::Watchdog;
use crate::lock::LockStatus;
use crate::scripts::LockScript;
use crate::store::{LockStore, RedisStore};
use crate::util::{get_lock_id, jitter_delay};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const POLL_JITTER_MS: u64 = 10;

/// === DistributedLock (lock on a single store node) ===
///
/// Ownership is proven by a token generated per acquisition; the remote key
/// is only ever deleted or renewed through the token-checked scripts. Without
/// an explicit lease the lock is held with the default lease and a watchdog
/// keeps renewing it until [`unlock`](Self::unlock) or drop.
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    key: String,
    config: LockConfig,
    token: Option<String>,
    watchdog: Option<Watchdog>,
    status: Arc<watch::Sender<LockStatus>>,
}

impl DistributedLock {
    pub fn new(key: &str, store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        let (status, _) = watch::channel(LockStatus::Unlocked);
        Self {
            store,
            key: key.to_string(),
            config,
            token: None,
            watchdog: None,
            status: Arc::new(status),
        }
    }

    /// Lock on a Redis node described by `node`
    pub fn with_node(key: &str, node: NodeConfig, config: LockConfig) -> LockResult<Self> {
        let store = RedisStore::new(node)?;
        Ok(Self::new(key, Arc::new(store), config))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn lease(&self) -> Duration {
        self.config.lease()
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn address(&self) -> &str {
        self.store.address()
    }

    pub fn status(&self) -> LockStatus {
        *self.status.borrow()
    }

    /// Status changes, including a loss detected by the watchdog
    pub fn subscribe(&self) -> watch::Receiver<LockStatus> {
        self.status.subscribe()
    }

    pub fn is_held(&self) -> bool {
        self.token.is_some() && self.status() == LockStatus::Held
    }

    /// Acquires the lock, waiting up to the configured timeout in block mode
    pub async fn lock(&mut self) -> LockResult<()> {
        self.lock_with_cancel(&CancellationToken::new()).await
    }

    /// Like [`lock`](Self::lock), giving up with [`LockError::Cancelled`]
    /// as soon as `cancel` fires during a blocking wait
    pub async fn lock_with_cancel(&mut self, cancel: &CancellationToken) -> LockResult<()> {
        self.ensure_unlocked().await?;
        if cancel.is_cancelled() {
            return Err(LockError::Cancelled);
        }

        let token = get_lock_id();
        match self.try_acquire(&token).await {
            Err(LockError::AcquiredByOthers) if self.config.block => {
                self.blocking_acquire(&token, cancel).await
            }
            result => result,
        }
    }

    /// Single non-blocking attempt with a caller supplied token
    pub(crate) async fn lock_with_token(&mut self, token: &str) -> LockResult<()> {
        self.ensure_unlocked().await?;
        self.try_acquire(token).await
    }

    /// Releases the lock. Releasing an unheld lock is a no-op, as is
    /// releasing one the watchdog already reported lost.
    pub async fn unlock(&mut self) -> LockResult<()> {
        let Some(token) = self.token.take() else {
            return Ok(());
        };

        // No renewal may race the delete below
        if let Some(mut watchdog) = self.watchdog.take() {
            watchdog.stop(self.config.watchdog_join_timeout).await;
        }

        if self.status() == LockStatus::Lost {
            debug!("Lock {} was already lost, nothing to release", self.key);
            return Ok(());
        }
        self.status.send_replace(LockStatus::Unlocked);

        let reply = self
            .store
            .eval_script(LockScript::CheckAndDelete, &[self.key.as_str()], &[token])
            .await?;

        if reply.unwrap_or(0) > 0 {
            debug!("Released lock {} on {}", self.key, self.store.address());
            Ok(())
        } else {
            warn!("Lock {} on {} was not held by self at release", self.key, self.store.address());
            Err(LockError::NotHeldBySelf)
        }
    }

    /// Deletes the key if it carries `token`, whatever this instance believes.
    /// Returns whether a key was deleted.
    pub(crate) async fn discard(&self, token: &str) -> LockResult<bool> {
        let reply = self
            .store
            .eval_script(LockScript::CheckAndDelete, &[self.key.as_str()], &[token.to_string()])
            .await?;
        Ok(reply.unwrap_or(0) > 0)
    }

    async fn ensure_unlocked(&mut self) -> LockResult<()> {
        if self.is_held() {
            return Err(LockError::InvalidOperation(format!(
                "lock {} is already held by this instance",
                self.key
            )));
        }
        // Left over from a lost lock
        if self.token.is_some() {
            self.unlock().await?;
        }
        Ok(())
    }

    async fn try_acquire(&mut self, token: &str) -> LockResult<()> {
        let lease_seconds = self.config.lease_seconds();
        if !self.store.set_nx_ex(&self.key, token, lease_seconds).await? {
            return Err(LockError::AcquiredByOthers);
        }

        self.token = Some(token.to_string());
        self.status.send_replace(LockStatus::Held);

        if self.config.watchdog_enabled() {
            self.watchdog = Some(Watchdog::start(
                self.store.clone(),
                self.key.clone(),
                token.to_string(),
                lease_seconds,
                self.config.watchdog_step(),
                self.status.clone(),
            ));
        }

        info!("Acquired lock {} on {} for {}s", self.key, self.store.address(), lease_seconds);
        Ok(())
    }

    async fn blocking_acquire(&mut self, token: &str, cancel: &CancellationToken) -> LockResult<()> {
        let deadline = Instant::now() + self.config.block_waiting();
        debug!("Lock {} is held by others, waiting up to {:?}", self.key, self.config.block_waiting());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
                _ = sleep_until(deadline) => return Err(LockError::AcquireTimeout),
                _ = sleep(jitter_delay(POLL_INTERVAL, POLL_JITTER_MS)) => {}
            }

            match self.try_acquire(token).await {
                Err(LockError::AcquiredByOthers) => continue,
                result => return result,
            }
        }
    }
}
