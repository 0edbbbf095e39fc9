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
use rand::Rng;
use uuid::Uuid;

/// Fresh ownership token, never reused across acquisitions
pub fn get_lock_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn calculate_drift(ttl: Duration, drift_factor: f64) -> Duration {
    let drift_ms = (ttl.as_millis() as f64 * drift_factor).ceil() as u64;
    Duration::from_millis(drift_ms)
}

pub fn calculate_quorum(n: usize) -> usize {
    n / 2 + 1
}

/// Remaining validity of a red lock after `elapsed` was spent acquiring it.
/// Zero means the lease may already be lapsing on the earliest nodes.
pub fn calculate_validity(lease: Duration, elapsed: Duration, drift_factor: f64) -> Duration {
    let margin = calculate_drift(lease, drift_factor) + Duration::from_millis(2);
    lease
        .checked_sub(elapsed)
        .and_then(|left| left.checked_sub(margin))
        .unwrap_or(Duration::ZERO)
}

pub fn jitter_delay(base_delay: Duration, jitter_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter = rng.gen_range(0..=jitter_ms);
    if rng.gen_bool(0.5) {
        base_delay + Duration::from_millis(jitter)
    } else {
        base_delay - Duration::from_millis(jitter).min(base_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_ids_are_unique() {
        assert_ne!(get_lock_id(), get_lock_id());
    }

    #[test]
    fn test_quorum() {
        assert_eq!(calculate_quorum(1), 1);
        assert_eq!(calculate_quorum(3), 2);
        assert_eq!(calculate_quorum(4), 3);
        assert_eq!(calculate_quorum(5), 3);
    }

    #[test]
    fn test_validity() {
        let lease = Duration::from_secs(10);
        assert_eq!(calculate_drift(lease, 0.01), Duration::from_millis(100));
        assert_eq!(
            calculate_validity(lease, Duration::from_secs(1), 0.01),
            Duration::from_millis(8898)
        );
        assert_eq!(
            calculate_validity(lease, Duration::from_millis(9950), 0.01),
            Duration::ZERO
        );
        assert_eq!(calculate_validity(lease, Duration::from_secs(11), 0.01), Duration::ZERO);
    }

    #[test]
    fn test_jitter_delay_bounds() {
        let base = Duration::from_millis(50);
        for _ in 0..100 {
            let delay = jitter_delay(base, 10);
            assert!(delay >= Duration::from_millis(40));
            assert!(delay <= Duration::from_millis(60));
        }
    }
}
