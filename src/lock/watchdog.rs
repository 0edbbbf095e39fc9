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
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::lock::LockStatus;
use crate::scripts::LockScript;
use crate::store::LockStore;

/// Lease renewal task owned by exactly one lock instance
pub(crate) struct Watchdog {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn start(
        store: Arc<dyn LockStore>,
        key: String,
        token: String,
        lease_seconds: u64,
        step: Duration,
        status: Arc<watch::Sender<LockStatus>>,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + step, step);
            // A slow renewal delays the next one instead of bursting
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let args = [token, lease_seconds.to_string()];

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        match store.eval_script(LockScript::CheckAndRenew, &[key.as_str()], &args).await {
                            Ok(Some(reply)) if reply > 0 => {
                                debug!("Renewed lock {} on {} for {}s", key, store.address(), lease_seconds);
                            }
                            Ok(_) => {
                                warn!("Lock {} on {} was lost, watchdog stops", key, store.address());
                                status.send_replace(LockStatus::Lost);
                                break;
                            }
                            Err(e) => {
                                warn!("Failed to renew lock {} on {}: {}", key, store.address(), e);
                            }
                        }
                    }
                }
            }
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signals the task and waits at most `join_timeout` for it; an in-flight
    /// renewal is aborted past that.
    pub async fn stop(&mut self, join_timeout: Duration) {
        let _ = self.stop_tx.send(true);

        if let Some(mut handle) = self.handle.take() {
            if timeout(join_timeout, &mut handle).await.is_err() {
                warn!("Watchdog did not stop within {:?}, aborting it", join_timeout);
                handle.abort();
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
