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


//! Distributed locks on Redis.
//!
//! [`DistributedLock`] guards one key on one node: acquisition is a
//! `SET key token EX ttl NX`, release and lease renewal go through
//! token-checked Lua scripts so a holder can never delete or extend a lock
//! it no longer owns. Without an explicit lease a watchdog keeps renewing the
//! key while the lock is held.
//!
//! [`RedLock`] acquires the same key on several independent nodes and holds
//! it only when a majority granted it within the lease.
//!
//! ```rust,no_run
//! use redis_distributed_lock::{DistributedLock, LockConfig, LockResult, NodeConfig};
//!
//! # async fn run() -> LockResult<()> {
//! let node = NodeConfig::tcp("127.0.0.1:6379");
//! let mut lock = DistributedLock::with_node("orders", node, LockConfig::blocking())?;
//! lock.lock().await?;
//! // critical section
//! lock.unlock().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod errors;
mod util;
mod lock;
mod scripts;
mod store;

pub use config::*;
pub use errors::*;
pub use util::*;
pub use lock::*;
pub use scripts::*;
pub use store::*;
