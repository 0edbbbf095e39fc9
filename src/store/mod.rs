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

mod memory;
mod redis_node;

pub use self::memory::*;
pub use self::redis_node::*;

use async_trait::async_trait;

use crate::errors::{LockError, LockResult};
use crate::scripts::LockScript;

/// The two atomic primitives the lock protocol needs from a store node.
///
/// Implementations never retry; a transport or protocol fault surfaces as
/// [`LockError::StoreUnavailable`] and leaves the store untouched.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Node address, used in logs and unlock reports
    fn address(&self) -> &str;

    /// `SET key value EX ttl NX`. Returns false when the key already exists.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> LockResult<bool>;

    /// Runs one of the lock scripts atomically, returning its integer (or nil) reply
    async fn eval_script(
        &self,
        script: LockScript,
        keys: &[&str],
        args: &[String],
    ) -> LockResult<Option<i64>>;
}

pub(crate) fn check_set_args(key: &str, value: &str, ttl_seconds: u64) -> LockResult<()> {
    if key.is_empty() || value.is_empty() {
        return Err(LockError::InvalidArgument(
            "redis SET key or value can't be empty".to_string(),
        ));
    }
    if ttl_seconds == 0 {
        return Err(LockError::InvalidArgument(
            "redis SET expire seconds must be positive".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn check_script_args(script: LockScript, keys: &[&str], args: &[String]) -> LockResult<()> {
    if keys.len() != script.key_count() || args.len() != script.arg_count() {
        return Err(LockError::InvalidArgument(format!(
            "{} expects {} key(s) and {} arg(s), got {} and {}",
            script.name(),
            script.key_count(),
            script.arg_count(),
            keys.len(),
            args.len()
        )));
    }
    Ok(())
}
