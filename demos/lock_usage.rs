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

use std::time::Duration;

use redis_distributed_lock::{
    DistributedLock, LockConfig, LockError, LockResult, NodeConfig, RedLock, RedLockConfig,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> LockResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 1. Single node lock, renewed by the watchdog while held
    let node = NodeConfig::tcp("127.0.0.1:6379");
    let mut lock = DistributedLock::with_node("demo_lock", node.clone(), LockConfig::default())?;
    lock.lock().await?;
    println!("Lock acquired with token {:?}", lock.token());

    // 2. A second non-blocking lock on the same key is refused
    let mut other = DistributedLock::with_node("demo_lock", node.clone(), LockConfig::default())?;
    match other.lock().await {
        Err(LockError::AcquiredByOthers) => println!("Second lock refused as expected"),
        result => println!("Unexpected result: {:?}", result),
    }
    lock.unlock().await?;

    // 3. A blocking lock waits for a short lease to lapse
    let mut short = DistributedLock::with_node("demo_lock", node.clone(), LockConfig::default().with_expire_seconds(1))?;
    short.lock().await?;
    let mut waiter = DistributedLock::with_node(
        "demo_lock",
        node,
        LockConfig::blocking().with_block_waiting_seconds(2),
    )?;
    waiter.lock().await?;
    println!("Blocking lock acquired after the lease lapsed");
    waiter.unlock().await?;

    // 4. Red lock over three independent nodes
    let nodes = vec![
        NodeConfig::tcp("127.0.0.1:7001"),
        NodeConfig::tcp("127.0.0.1:7002"),
        NodeConfig::tcp("127.0.0.1:7003"),
    ];
    let mut red_lock = RedLock::with_nodes(
        "demo_red_lock",
        &nodes,
        RedLockConfig::default().with_expire_duration(Duration::from_secs(10)),
    )?;
    red_lock.lock().await?;
    println!("Red lock acquired on {} nodes", red_lock.held_nodes());
    let report = red_lock.unlock().await;
    println!("Red lock released on {} nodes, {} failure(s)", report.released, report.failures.len());

    Ok(())
}
