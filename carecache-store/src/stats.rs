//! Hit/miss accounting.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time view of cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_operations: u64,
    /// `hits / (hits + misses)`, or 0 before any read.
    pub hit_rate: f64,
    /// Mean over the most recent samples only.
    pub avg_response_time_ms: f64,
}

/// Process-lifetime counters shared by every caller of a store.
#[derive(Debug)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    operations: AtomicU64,
    samples: Mutex<VecDeque<f64>>,
    window: usize,
}

impl StatsRecorder {
    pub(crate) fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            operations: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(window)),
            window,
        }
    }

    pub(crate) fn record_read(&self, hit: bool, elapsed: Duration) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        self.record_operation(elapsed);
    }

    /// One multi-key read: counts every key, samples the call once.
    pub(crate) fn record_batch_read(&self, hits: u64, misses: u64, elapsed: Duration) {
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses.fetch_add(misses, Ordering::Relaxed);
        self.record_operation(elapsed);
    }

    pub(crate) fn record_operation(&self, elapsed: Duration) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let mut samples = self.samples.lock();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let reads = hits + misses;
        let avg = {
            let samples = self.samples.lock();
            if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            }
        };

        CacheStats {
            hits,
            misses,
            total_operations: self.operations.load(Ordering::Relaxed),
            hit_rate: if reads == 0 {
                0.0
            } else {
                hits as f64 / reads as f64
            },
            avg_response_time_ms: avg,
        }
    }

    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.operations.store(0, Ordering::Relaxed);
        self.samples.lock().clear();
    }
}
