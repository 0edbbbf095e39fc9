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

use futures::future::join_all;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::{NodeConfig, RedLockConfig};
use crate::errors::{LockError, LockResult};
use crate::lock::{DistributedLock, LockStatus};
use crate::store::{LockStore, RedisStore};
use crate::util::{calculate_quorum, calculate_validity, get_lock_id};

/// A node that could not be released
#[derive(Debug)]
pub struct NodeFailure {
    pub address: String,
    pub error: LockError,
}

/// Outcome of releasing a red lock. Partial failures are reported here
/// instead of failing the unlock; the keys left behind expire with their lease.
#[derive(Debug, Default)]
pub struct UnlockReport {
    /// Nodes whose key was deleted by this release. Nodes lost to expiry or
    /// another holder are reported as failures instead.
    pub released: usize,
    pub failures: Vec<NodeFailure>,
}

impl UnlockReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// === RedLock (quorum lock over independent nodes) ===
pub struct RedLock {
    key: String,
    locks: Vec<DistributedLock>,
    config: RedLockConfig,
    token: Option<String>,
}

impl RedLock {
    pub fn new(key: &str, stores: Vec<Arc<dyn LockStore>>, config: RedLockConfig) -> LockResult<Self> {
        config.validate(stores.len())?;
        let node_config = config.node_lock_config();
        let locks = stores
            .into_iter()
            .map(|store| DistributedLock::new(key, store, node_config.clone()))
            .collect();

        Ok(Self {
            key: key.to_string(),
            locks,
            config,
            token: None,
        })
    }

    /// Red lock over Redis nodes
    pub fn with_nodes(key: &str, nodes: &[NodeConfig], config: RedLockConfig) -> LockResult<Self> {
        let stores = nodes
            .iter()
            .map(|node| RedisStore::new(node.clone()).map(|store| Arc::new(store) as Arc<dyn LockStore>))
            .collect::<LockResult<Vec<_>>>()?;
        Self::new(key, stores, config)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn node_count(&self) -> usize {
        self.locks.len()
    }

    pub fn quorum(&self) -> usize {
        calculate_quorum(self.locks.len())
    }

    /// Held only while a quorum of nodes still holds the shared token. Nodes
    /// whose watchdog found the key gone no longer count.
    pub fn is_held(&self) -> bool {
        self.token.is_some() && self.held_nodes() >= self.quorum()
    }

    /// Number of nodes currently held by this instance
    pub fn held_nodes(&self) -> usize {
        self.locks.iter().filter(|lock| lock.is_held()).count()
    }

    /// Number of nodes whose lease was lost since the last acquisition
    pub fn lost_nodes(&self) -> usize {
        self.locks
            .iter()
            .filter(|lock| lock.status() == LockStatus::Lost)
            .count()
    }

    /// Per node status, in node order
    pub fn node_statuses(&self) -> Vec<LockStatus> {
        self.locks.iter().map(|lock| lock.status()).collect()
    }

    /// Tries every node once, concurrently, each within the single node timeout.
    /// Holds the lock only if a quorum granted it and the lease still has
    /// validity left after the time spent acquiring; otherwise every node is
    /// rolled back.
    pub async fn lock(&mut self) -> LockResult<()> {
        if self.token.is_some() {
            return Err(LockError::InvalidOperation(format!(
                "red lock {} is already held by this instance",
                self.key
            )));
        }

        let token = get_lock_id();
        let node_timeout = self.config.single_node_timeout;
        let start_time = Instant::now();

        let results = {
            let token = token.as_str();
            join_all(self.locks.iter_mut().map(|lock| async move {
                match timeout(node_timeout, lock.lock_with_token(token)).await {
                    Ok(result) => result,
                    Err(_) => Err(LockError::AcquireTimeout),
                }
            }))
            .await
        };

        let mut acquired = 0;
        for (lock, result) in self.locks.iter().zip(&results) {
            match result {
                Ok(()) => acquired += 1,
                Err(e) if e.is_contention() => {
                    debug!("Red lock {} not acquired on {}: {}", self.key, lock.address(), e)
                }
                Err(e) => warn!("Red lock {} node {} failed: {}", self.key, lock.address(), e),
            }
        }

        let elapsed = start_time.elapsed();
        let validity = calculate_validity(self.config.lease(), elapsed, self.config.drift_factor);
        let quorum = self.quorum();

        if acquired >= quorum && !validity.is_zero() {
            info!(
                "Acquired red lock {} on {}/{} nodes in {:?}, validity {:?}",
                self.key,
                acquired,
                self.locks.len(),
                elapsed,
                validity
            );
            self.token = Some(token);
            return Ok(());
        }

        warn!(
            "Red lock {} failed: {}/{} nodes (quorum {}) in {:?}",
            self.key,
            acquired,
            self.locks.len(),
            quorum,
            elapsed
        );
        let report = self.release_all(&token).await;
        if !report.is_clean() {
            warn!("Red lock {} rollback left {} node(s) to expire", self.key, report.failures.len());
        }
        Err(LockError::QuorumFailed { acquired, quorum })
    }

    /// Releases every node. Never fails; per node errors are in the report.
    pub async fn unlock(&mut self) -> UnlockReport {
        let Some(token) = self.token.take() else {
            return UnlockReport::default();
        };
        let report = self.release_all(&token).await;
        for failure in &report.failures {
            warn!("Red lock {} release failed on {}: {}", self.key, failure.address, failure.error);
        }
        report
    }

    // Nodes this instance does not hold are still cleaned by token: an attempt
    // cut off by the node timeout may have set the key anyway.
    async fn release_all(&mut self, token: &str) -> UnlockReport {
        let results = join_all(self.locks.iter_mut().map(|lock| async move {
            let result = if lock.token().is_some() {
                if lock.status() == LockStatus::Lost {
                    // Nothing of ours is left on that node
                    lock.unlock().await.and(Err(LockError::NotHeldBySelf))
                } else {
                    lock.unlock().await.map(|_| true)
                }
            } else {
                lock.discard(token).await
            };
            (lock.address().to_string(), result)
        }))
        .await;

        let mut report = UnlockReport::default();
        for (address, result) in results {
            match result {
                Ok(true) => report.released += 1,
                Ok(false) => {}
                Err(error) => report.failures.push(NodeFailure { address, error }),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn nodes(n: usize) -> Vec<Arc<MemoryStore>> {
        (0..n)
            .map(|i| Arc::new(MemoryStore::new(&format!("10.0.0.{}:6379", i + 1))))
            .collect()
    }

    fn red_lock(key: &str, nodes: &[Arc<MemoryStore>], config: RedLockConfig) -> LockResult<RedLock> {
        let stores = nodes
            .iter()
            .map(|node| node.clone() as Arc<dyn LockStore>)
            .collect();
        RedLock::new(key, stores, config)
    }

    #[test]
    fn test_requires_three_nodes() {
        let nodes = nodes(2);
        assert!(matches!(
            red_lock("k", &nodes, RedLockConfig::default()),
            Err(LockError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_with_nodes_builds_without_connecting() -> LockResult<()> {
        let configs = vec![
            NodeConfig::tcp("127.0.0.1:7001"),
            NodeConfig::tcp("127.0.0.1:7002"),
            NodeConfig::tcp("127.0.0.1:7003"),
        ];
        let lock = RedLock::with_nodes("k", &configs, RedLockConfig::default())?;
        assert_eq!(lock.node_count(), 3);
        assert_eq!(lock.quorum(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_and_unlock_all_nodes() -> LockResult<()> {
        let nodes = nodes(5);
        let mut lock = red_lock(
            "k",
            &nodes,
            RedLockConfig::default().with_expire_duration(Duration::from_secs(10)),
        )?;

        lock.lock().await?;
        assert!(lock.is_held());
        assert_eq!(lock.held_nodes(), 5);
        let token = nodes[0].get("k");
        assert!(token.is_some());
        assert!(nodes.iter().all(|node| node.get("k") == token));

        let report = lock.unlock().await;
        assert!(report.is_clean());
        assert_eq!(report.released, 5);
        assert!(!lock.is_held());
        assert!(nodes.iter().all(|node| node.is_empty()));
        Ok(())
    }

    #[tokio::test]
    async fn test_minority_unreachable() -> LockResult<()> {
        let nodes = nodes(3);
        nodes[2].set_unreachable(true);
        let mut lock = red_lock("k", &nodes, RedLockConfig::default())?;

        lock.lock().await?;
        assert_eq!(lock.held_nodes(), 2);

        let report = lock.unlock().await;
        assert_eq!(report.released, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].address, "10.0.0.3:6379");
        assert!(matches!(report.failures[0].error, LockError::StoreUnavailable(_)));
        assert!(nodes[0].is_empty() && nodes[1].is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_majority_unreachable_rolls_back() -> LockResult<()> {
        let nodes = nodes(3);
        nodes[1].set_unreachable(true);
        nodes[2].set_unreachable(true);
        let mut lock = red_lock("k", &nodes, RedLockConfig::default())?;

        assert!(matches!(
            lock.lock().await,
            Err(LockError::QuorumFailed { acquired: 1, quorum: 2 })
        ));
        assert!(!lock.is_held());
        assert_eq!(lock.held_nodes(), 0);
        assert!(nodes[0].is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_contended_nodes_fail_quorum() -> LockResult<()> {
        let nodes = nodes(3);
        nodes[0].insert("k", "other", Duration::from_secs(30));
        nodes[1].insert("k", "other", Duration::from_secs(30));
        let mut lock = red_lock("k", &nodes, RedLockConfig::default())?;

        assert!(matches!(
            lock.lock().await,
            Err(LockError::QuorumFailed { acquired: 1, quorum: 2 })
        ));
        // Rollback never touches another holder's keys
        assert_eq!(nodes[0].get("k").as_deref(), Some("other"));
        assert_eq!(nodes[1].get("k").as_deref(), Some("other"));
        assert!(nodes[2].is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_nodes_count_as_failed() -> LockResult<()> {
        let nodes = nodes(3);
        nodes[0].set_latency(Duration::from_millis(200));
        nodes[1].set_latency(Duration::from_millis(200));
        let mut lock = red_lock("k", &nodes, RedLockConfig::default())?;

        assert!(matches!(
            lock.lock().await,
            Err(LockError::QuorumFailed { acquired: 1, quorum: 2 })
        ));
        assert!(nodes.iter().all(|node| node.is_empty()));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_validity_fails() -> LockResult<()> {
        let nodes = nodes(3);
        for node in &nodes {
            node.set_latency(Duration::from_millis(10));
        }
        let config = RedLockConfig::default()
            .with_single_node_timeout(Duration::from_millis(30))
            .with_expire_duration(Duration::from_secs(1))
            .with_drift_factor(0.99);
        let mut lock = red_lock("k", &nodes, config)?;

        assert!(matches!(
            lock.lock().await,
            Err(LockError::QuorumFailed { acquired: 3, quorum: 2 })
        ));
        assert!(nodes.iter().all(|node| node.is_empty()));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_nodes_are_reported() -> LockResult<()> {
        let nodes = nodes(3);
        let mut lock = red_lock("k", &nodes, RedLockConfig::default())?;

        lock.lock().await?;
        assert!(lock.is_held());
        nodes[0].remove("k");
        nodes[1].remove("k");

        // First renewal finds the key gone on two nodes
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(lock.lost_nodes(), 2);
        assert_eq!(lock.held_nodes(), 1);
        assert_eq!(
            lock.node_statuses(),
            vec![LockStatus::Lost, LockStatus::Lost, LockStatus::Held]
        );
        assert!(!lock.is_held());

        let report = lock.unlock().await;
        assert!(!report.is_clean());
        assert_eq!(report.released, 1);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|failure| matches!(failure.error, LockError::NotHeldBySelf)));
        assert_eq!(report.failures[0].address, "10.0.0.1:6379");
        assert!(nodes.iter().all(|node| node.is_empty()));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_lost_node_keeps_quorum() -> LockResult<()> {
        let nodes = nodes(3);
        let mut lock = red_lock("k", &nodes, RedLockConfig::default())?;

        lock.lock().await?;
        nodes[2].insert("k", "other", Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(lock.lost_nodes(), 1);
        assert!(lock.is_held());

        let report = lock.unlock().await;
        assert_eq!(report.released, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].address, "10.0.0.3:6379");
        assert_eq!(nodes[2].get("k").as_deref(), Some("other"));
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_again_after_unlock() -> LockResult<()> {
        let nodes = nodes(3);
        let mut lock = red_lock("k", &nodes, RedLockConfig::default())?;

        lock.lock().await?;
        let first = nodes[0].get("k");
        lock.unlock().await;

        lock.lock().await?;
        assert_ne!(nodes[0].get("k"), first);
        assert!(matches!(lock.lock().await, Err(LockError::InvalidOperation(_))));
        assert!(lock.unlock().await.is_clean());
        Ok(())
    }

    #[tokio::test]
    async fn test_competing_red_locks() -> LockResult<()> {
        let nodes = nodes(3);
        let mut lock1 = red_lock("k", &nodes, RedLockConfig::default())?;
        let mut lock2 = red_lock("k", &nodes, RedLockConfig::default())?;

        lock1.lock().await?;
        assert!(matches!(lock2.lock().await, Err(LockError::QuorumFailed { acquired: 0, .. })));
        assert_eq!(lock1.held_nodes(), 3);

        lock1.unlock().await;
        lock2.lock().await?;
        assert!(lock2.unlock().await.is_clean());
        Ok(())
    }
}
