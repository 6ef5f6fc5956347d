//! Dispatch statistics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of dispatch statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationStats {
    pub total_invalidations: u64,
    pub successful_invalidations: u64,
    pub failed_invalidations: u64,
    pub last_invalidation_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl StatsRecorder {
    pub(crate) fn record(&self, success: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        *self.last.lock() = Some(Utc::now());
    }

    pub(crate) fn snapshot(&self) -> InvalidationStats {
        InvalidationStats {
            total_invalidations: self.total.load(Ordering::Relaxed),
            successful_invalidations: self.successful.load(Ordering::Relaxed),
            failed_invalidations: self.failed.load(Ordering::Relaxed),
            last_invalidation_time: *self.last.lock(),
        }
    }
}
