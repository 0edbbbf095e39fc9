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

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{LockError, LockResult};

/// Connection pool wait timeout
pub const DEFAULT_LINK_TIMEOUT_SECONDS: u64 = 10;
/// Maximum number of active connections per node
pub const DEFAULT_MAX_ACTIVE_LINKS: usize = 100;
/// Default waiting time of a blocking lock
pub const DEFAULT_BLOCK_WAITING_SECONDS: u64 = 5;
/// Lease used when no explicit expiry is configured (watchdog mode)
pub const DEFAULT_LOCK_EXPIRE_SECONDS: u64 = 30;
/// Watchdog renewal step
pub const DEFAULT_WATCHDOG_STEP_SECONDS: u64 = 10;
/// How long unlock waits for the watchdog task to stop
pub const DEFAULT_WATCHDOG_JOIN_TIMEOUT: Duration = Duration::from_secs(1);
/// Per node acquisition budget of a red lock
pub const DEFAULT_SINGLE_NODE_TIMEOUT: Duration = Duration::from_millis(50);
/// Clock drift factor of a red lock
pub const DEFAULT_DRIFT_FACTOR: f64 = 0.01;

/// Connection descriptor of a single store node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// "tcp" or "unix"
    pub network: String,
    /// host:port for tcp, socket path for unix
    pub address: String,
    /// PASSWORD
    pub password: Option<String>,
    /// Database number
    pub database: Option<i64>,
    /// Connection wait timeout
    pub link_timeout: Duration,
    /// Connection pool size
    pub max_active_links: usize,
    /// Wait for a free connection when the pool is exhausted
    pub wait: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            address: String::new(),
            password: None,
            database: None,
            link_timeout: Duration::from_secs(DEFAULT_LINK_TIMEOUT_SECONDS),
            max_active_links: DEFAULT_MAX_ACTIVE_LINKS,
            wait: false,
        }
    }
}

impl NodeConfig {
    pub fn new(network: &str, address: &str, password: &str) -> Self {
        Self {
            network: network.to_string(),
            address: address.to_string(),
            password: if password.is_empty() { None } else { Some(password.to_string()) },
            ..Default::default()
        }
    }

    pub fn tcp(address: &str) -> Self {
        Self::new("tcp", address, "")
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_database(mut self, db: i64) -> Self {
        self.database = Some(db);
        self
    }

    pub fn with_link_timeout(mut self, timeout: Duration) -> Self {
        self.link_timeout = timeout;
        self
    }

    pub fn with_max_active_links(mut self, links: usize) -> Self {
        self.max_active_links = links;
        self
    }

    pub fn with_wait_mode(mut self) -> Self {
        self.wait = true;
        self
    }

    pub fn validate(&self) -> LockResult<()> {
        if self.address.is_empty() {
            return Err(LockError::InvalidConfiguration(
                "Cannot get redis address from config".to_string(),
            ));
        }
        if self.network != "tcp" && self.network != "unix" {
            return Err(LockError::InvalidConfiguration(format!(
                "Unsupported network: {}",
                self.network
            )));
        }
        if self.max_active_links == 0 {
            return Err(LockError::InvalidConfiguration(
                "Pool size cannot be zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection url understood by the redis client
    pub fn connection_url(&self) -> String {
        if self.network == "unix" {
            return match self.database {
                Some(db) => format!("redis+unix://{}?db={}", self.address, db),
                None => format!("redis+unix://{}", self.address),
            };
        }
        let auth = match &self.password {
            Some(password) => format!(":{}@", password),
            None => String::new(),
        };
        format!("redis://{}{}/{}", auth, self.address, self.database.unwrap_or(0))
    }

    /// Pool wait timeout, zero when the pool must fail fast
    pub fn pool_wait_timeout(&self) -> Duration {
        if self.wait {
            self.link_timeout
        } else {
            Duration::ZERO
        }
    }
}

/// Single node lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Retry until the wait timeout when the key is held by others
    pub block: bool,
    /// Wait timeout of a blocking acquisition
    pub block_waiting_seconds: u64,
    /// Explicit lease, absence enables the watchdog
    pub expire_seconds: Option<u64>,
    /// Watchdog renewal step
    pub watchdog_step_seconds: u64,
    /// Bounded wait for the watchdog to stop during unlock
    pub watchdog_join_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            block: false,
            block_waiting_seconds: DEFAULT_BLOCK_WAITING_SECONDS,
            expire_seconds: None,
            watchdog_step_seconds: DEFAULT_WATCHDOG_STEP_SECONDS,
            watchdog_join_timeout: DEFAULT_WATCHDOG_JOIN_TIMEOUT,
        }
    }
}

impl LockConfig {
    pub fn blocking() -> Self {
        Self::default().with_block_mode()
    }

    pub fn with_block_mode(mut self) -> Self {
        self.block = true;
        self
    }

    pub fn with_block_waiting_seconds(mut self, seconds: u64) -> Self {
        self.block_waiting_seconds = seconds;
        self
    }

    pub fn with_expire_seconds(mut self, seconds: u64) -> Self {
        self.expire_seconds = Some(seconds);
        self
    }

    pub fn with_watchdog_step_seconds(mut self, seconds: u64) -> Self {
        self.watchdog_step_seconds = seconds;
        self
    }

    pub fn with_watchdog_join_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_join_timeout = timeout;
        self
    }

    /// A zero expiry counts as unset
    pub fn watchdog_enabled(&self) -> bool {
        !matches!(self.expire_seconds, Some(seconds) if seconds > 0)
    }

    pub fn lease_seconds(&self) -> u64 {
        match self.expire_seconds {
            Some(seconds) if seconds > 0 => seconds,
            _ => DEFAULT_LOCK_EXPIRE_SECONDS,
        }
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds())
    }

    pub fn block_waiting(&self) -> Duration {
        if self.block_waiting_seconds == 0 {
            Duration::from_secs(DEFAULT_BLOCK_WAITING_SECONDS)
        } else {
            Duration::from_secs(self.block_waiting_seconds)
        }
    }

    /// Renewal interval, always strictly below the lease
    pub fn watchdog_step(&self) -> Duration {
        let lease = self.lease();
        let step = Duration::from_secs(self.watchdog_step_seconds);
        if step.is_zero() || step >= lease {
            lease / 3
        } else {
            step
        }
    }
}

/// Red lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedLockConfig {
    /// Acquisition budget of each node
    pub single_node_timeout: Duration,
    /// Overall lease, absence puts the node locks in watchdog mode
    pub expire_duration: Option<Duration>,
    /// Clock offset factor
    pub drift_factor: f64,
}

impl Default for RedLockConfig {
    fn default() -> Self {
        Self {
            single_node_timeout: DEFAULT_SINGLE_NODE_TIMEOUT,
            expire_duration: None,
            drift_factor: DEFAULT_DRIFT_FACTOR,
        }
    }
}

impl RedLockConfig {
    pub fn with_single_node_timeout(mut self, timeout: Duration) -> Self {
        self.single_node_timeout = timeout;
        self
    }

    pub fn with_expire_duration(mut self, duration: Duration) -> Self {
        self.expire_duration = Some(duration);
        self
    }

    pub fn with_drift_factor(mut self, factor: f64) -> Self {
        self.drift_factor = factor;
        self
    }

    pub fn lease(&self) -> Duration {
        match self.expire_duration {
            Some(duration) if !duration.is_zero() => duration,
            _ => Duration::from_secs(DEFAULT_LOCK_EXPIRE_SECONDS),
        }
    }

    /// Configuration of every node lock. Sub-second leases round up since
    /// the store expires keys in whole seconds.
    pub fn node_lock_config(&self) -> LockConfig {
        match self.expire_duration {
            Some(duration) if !duration.is_zero() => {
                let millis = duration.as_millis() as u64;
                LockConfig::default().with_expire_seconds(millis.div_ceil(1000).max(1))
            }
            _ => LockConfig::default(),
        }
    }

    pub fn validate(&self, nodes: usize) -> LockResult<()> {
        if nodes < 3 {
            return Err(LockError::InvalidConfiguration(
                "Can not use red lock with less than 3 nodes".to_string(),
            ));
        }
        if self.single_node_timeout.is_zero() {
            return Err(LockError::InvalidConfiguration(
                "Single node timeout cannot be zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.drift_factor) {
            return Err(LockError::InvalidConfiguration(format!(
                "Drift factor must be within [0, 1): {}",
                self.drift_factor
            )));
        }
        let budget = u32::try_from(nodes)
            .ok()
            .and_then(|nodes| nodes.checked_mul(10))
            .and_then(|factor| self.single_node_timeout.checked_mul(factor));
        match budget {
            Some(budget) if budget <= self.lease() => {}
            _ => {
                return Err(LockError::InvalidConfiguration(
                    "Expire thresholds of single node is too long".to_string(),
                ))
            }
        }
        Ok(())
    }
}
