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


use redis::RedisError;
use thiserror::Error;

pub type LockResult<T> = std::result::Result<T, LockError>;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Lock is acquired by others")]
    AcquiredByOthers,

    #[error("Lock acquisition timeout")]
    AcquireTimeout,

    #[error("Lock acquisition cancelled")]
    Cancelled,

    #[error("Lock is not held by self")]
    NotHeldBySelf,

    #[error("Red lock quorum failed: acquired {acquired} of required {quorum}")]
    QuorumFailed { acquired: usize, quorum: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl LockError {
    /// Lock contention outcomes, as opposed to faults talking to a node.
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::AcquiredByOthers | LockError::AcquireTimeout)
    }
}

impl From<RedisError> for LockError {
    fn from(err: RedisError) -> Self {
        LockError::StoreUnavailable(err.to_string())
    }
}

impl From<deadpool::managed::PoolError<RedisError>> for LockError {
    fn from(err: deadpool::managed::PoolError<RedisError>) -> Self {
        LockError::StoreUnavailable(err.to_string())
    }
}

impl From<deadpool::managed::BuildError> for LockError {
    fn from(err: deadpool::managed::BuildError) -> Self {
        LockError::InvalidConfiguration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention_errors() {
        assert!(LockError::AcquiredByOthers.is_contention());
        assert!(LockError::AcquireTimeout.is_contention());
        assert!(!LockError::StoreUnavailable("connection refused".to_string()).is_contention());
        assert!(!LockError::NotHeldBySelf.is_contention());
    }
}
