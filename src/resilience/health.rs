// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote store reachability tracking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::storage::traits::RemoteStore;

/// Consecutive failures before the remote store is reported unreachable.
const UNHEALTHY_AFTER: u64 = 3;

/// Tracks remote store health from operation outcomes and explicit pings.
pub struct RemoteHealth {
    healthy: AtomicBool,
    failures: AtomicU64,
    /// Serializes pings so concurrent health checks don't stampede the store
    checking: Mutex<()>,
}

impl RemoteHealth {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            failures: AtomicU64::new(0),
            checking: Mutex::new(()),
        }
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        if !self.healthy.swap(true, Ordering::AcqRel) {
            info!("Remote store reachable again");
            crate::metrics::set_backend_healthy("remote", true);
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= UNHEALTHY_AFTER && self.healthy.swap(false, Ordering::AcqRel) {
            warn!(failures, "Remote store marked unreachable");
            crate::metrics::set_backend_healthy("remote", false);
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    /// Ping the store and fold the outcome into the tracked state.
    pub async fn check(&self, remote: &dyn RemoteStore) -> bool {
        let _guard = self.checking.lock().await;
        match remote.ping().await {
            Ok(()) => {
                self.record_success();
                true
            }
            Err(_) => {
                self.record_failure();
                false
            }
        }
    }
}

impl Default for RemoteHealth {
    fn default() -> Self {
        Self::new()
    }
}
