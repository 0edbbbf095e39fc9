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


use once_cell::sync::Lazy;
use redis::Script;

/// Deletes the lock only if it is still owned by the token
pub const CHECK_AND_DELETE_SOURCE: &str = r#"
    local key = KEYS[1]
    local token = ARGV[1]
    local current = redis.call('get', key)
    if (not current or current ~= token) then
        return 0
    else
        return redis.call('del', key)
    end
"#;

/// Renews the lease only if the lock is still owned by the token
pub const CHECK_AND_RENEW_SOURCE: &str = r#"
    local key = KEYS[1]
    local token = ARGV[1]
    local ttl = ARGV[2]
    local current = redis.call('get', key)
    if (not current or current ~= token) then
        return 0
    else
        return redis.call('expire', key, ttl)
    end
"#;

pub static CHECK_AND_DELETE_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(CHECK_AND_DELETE_SOURCE));

pub static CHECK_AND_RENEW_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(CHECK_AND_RENEW_SOURCE));

/// The compare-and-act procedures a lock store must run atomically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScript {
    /// KEYS[1] = lock key, ARGV[1] = token
    CheckAndDelete,
    /// KEYS[1] = lock key, ARGV[1] = token, ARGV[2] = ttl seconds
    CheckAndRenew,
}

impl LockScript {
    pub fn source(&self) -> &'static str {
        match self {
            LockScript::CheckAndDelete => CHECK_AND_DELETE_SOURCE,
            LockScript::CheckAndRenew => CHECK_AND_RENEW_SOURCE,
        }
    }

    pub fn script(&self) -> &'static Script {
        match self {
            LockScript::CheckAndDelete => &*CHECK_AND_DELETE_SCRIPT,
            LockScript::CheckAndRenew => &*CHECK_AND_RENEW_SCRIPT,
        }
    }

    pub fn key_count(&self) -> usize {
        1
    }

    pub fn arg_count(&self) -> usize {
        match self {
            LockScript::CheckAndDelete => 1,
            LockScript::CheckAndRenew => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LockScript::CheckAndDelete => "check_and_delete",
            LockScript::CheckAndRenew => "check_and_renew",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_compare_token_before_acting() {
        for script in [LockScript::CheckAndDelete, LockScript::CheckAndRenew] {
            let source = script.source();
            let get = source.find("redis.call('get', key)").unwrap();
            let compare = source.find("current ~= token").unwrap();
            assert!(get < compare);
        }
        assert!(CHECK_AND_DELETE_SOURCE.contains("redis.call('del', key)"));
        assert!(CHECK_AND_RENEW_SOURCE.contains("redis.call('expire', key, ttl)"));
    }

    #[test]
    fn test_script_hashes_are_distinct() {
        assert_ne!(
            LockScript::CheckAndDelete.script().get_hash(),
            LockScript::CheckAndRenew.script().get_hash()
        );
    }
}
