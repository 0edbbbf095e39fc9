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

use async_trait::async_trait;
use deadpool::managed::{Metrics, Pool, RecycleError, RecycleResult};
use deadpool::Runtime;
use redis::{Client, RedisError};
use tracing::debug;

use crate::config::NodeConfig;
use crate::errors::{LockError, LockResult};
use crate::scripts::LockScript;
use crate::store::{check_script_args, check_set_args, LockStore};

type RedisPool = Pool<RedisConnectionManager>;

/// Creates multiplexed connections and PINGs them on recycle
pub struct RedisConnectionManager {
    client: Client,
}

#[async_trait]
impl deadpool::managed::Manager for RedisConnectionManager {
    type Type = redis::aio::MultiplexedConnection;
    type Error = RedisError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn recycle(&self, conn: &mut Self::Type, _metrics: &Metrics) -> RecycleResult<Self::Error> {
        match redis::cmd("PING").query_async::<String>(conn).await {
            Ok(pong) if pong == "PONG" => Ok(()),
            Ok(_) => Err(RecycleError::Message("Invalid PONG response".into())),
            Err(e) => Err(RecycleError::Backend(e)),
        }
    }
}

/// A single Redis node. A pooled connection is borrowed for exactly one
/// command and handed back before any waiting happens in the lock layer.
pub struct RedisStore {
    config: NodeConfig,
    pool: RedisPool,
}

impl RedisStore {
    /// Builds the pool without connecting; connection faults show up on first use.
    pub fn new(config: NodeConfig) -> LockResult<Self> {
        config.validate()?;
        let client = Client::open(config.connection_url())
            .map_err(|e| LockError::InvalidConfiguration(e.to_string()))?;

        let pool = Pool::builder(RedisConnectionManager { client })
            .max_size(config.max_active_links)
            .wait_timeout(Some(config.pool_wait_timeout()))
            .create_timeout(Some(config.link_timeout))
            .recycle_timeout(Some(config.link_timeout))
            .runtime(Runtime::Tokio1)
            .build()?;

        debug!("Created redis store for {}", config.address);
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub async fn get(&self, key: &str) -> LockResult<Option<String>> {
        if key.is_empty() {
            return Err(LockError::InvalidArgument("redis GET key can't be empty".to_string()));
        }
        let mut conn = self.pool.get().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut *conn).await?;
        Ok(value)
    }

    /// Remaining time to live in seconds, -2 when the key does not exist
    pub async fn ttl(&self, key: &str) -> LockResult<i64> {
        let mut conn = self.pool.get().await?;
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut *conn).await?;
        Ok(ttl)
    }

    pub async fn ping(&self) -> bool {
        match self.pool.get().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<String>(&mut *conn)
                .await
                .is_ok(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl LockStore for RedisStore {
    fn address(&self) -> &str {
        &self.config.address
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> LockResult<bool> {
        check_set_args(key, value, ttl_seconds)?;
        let mut conn = self.pool.get().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .arg("NX")
            .query_async(&mut *conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn eval_script(
        &self,
        script: LockScript,
        keys: &[&str],
        args: &[String],
    ) -> LockResult<Option<i64>> {
        check_script_args(script, keys, args)?;
        let mut invocation = script.script().prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg);
        }
        let mut conn = self.pool.get().await?;
        let reply: Option<i64> = invocation.invoke_async(&mut *conn).await?;
        Ok(reply)
    }
}
