// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for garbage-collecting finished operations.
//!
//! Completed and failed operations stay in the tracker for a retention window
//! so late subscribers and pollers can still read their outcome. This worker
//! periodically drops the ones past that window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::tracker::OperationTracker;

/// Configuration for the retention worker.
#[derive(Debug, Clone)]
pub struct RetentionWorkerConfig {
    /// How often to sweep.
    pub poll_interval: Duration,
    /// How long a terminal operation is kept.
    pub retention: Duration,
}

impl Default for RetentionWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            retention: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// Background worker that purges expired operations.
pub struct RetentionWorker {
    tracker: OperationTracker,
    config: RetentionWorkerConfig,
    shutdown: Arc<Notify>,
}

impl RetentionWorker {
    /// Create a new retention worker.
    pub fn new(tracker: OperationTracker, config: RetentionWorkerConfig) -> Self {
        Self {
            tracker,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            "Retention worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Retention worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.sweep();
                }
            }
        }

        info!("Retention worker stopped");
    }

    /// Purge expired operations once. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let purged = self.tracker.purge_expired(self.config.retention);
        if purged > 0 {
            info!(purged, "Purged expired operations");
        } else {
            debug!("Retention sweep found nothing to purge");
        }
        purged
    }
}
