//! Cache metrics
//!
//! Monotonic counters updated after every operation. Counters are never
//! reset; rates are derived when a snapshot is taken.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of the cache counters at a point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    /// Reads that found a value
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Successful writes
    pub sets: u64,
    /// Deletes that removed a key
    pub deletes: u64,
    /// Failed operations
    pub errors: u64,
    /// `hits / (hits + misses)`, 0 before the first read
    pub hit_rate: f64,
    /// Mean duration of timed operations
    pub average_access_time: Duration,
}

/// Atomic counters shared by a client and its health monitor
///
/// `Ordering::Relaxed` is enough: counters are independent and a snapshot
/// only needs to be approximately consistent.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    timed_ops: AtomicU64,
    access_time_us: AtomicU64,
}

impl CacheMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    fn record_access(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.timed_ops.fetch_add(1, Ordering::Relaxed);
        self.access_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    /// Count a read that found a value
    pub fn record_hit(&self, elapsed: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.record_access(elapsed);
    }

    /// Count a read that found nothing
    pub fn record_miss(&self, elapsed: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_access(elapsed);
    }

    /// Count a successful write
    pub fn record_set(&self, elapsed: Duration) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.record_access(elapsed);
    }

    /// Count a delete that removed a key
    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed operation
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Total errors so far
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Current values with derived rates
    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let reads = hits + misses;
        let timed_ops = self.timed_ops.load(Ordering::Relaxed);
        let access_time_us = self.access_time_us.load(Ordering::Relaxed);

        MetricsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if reads == 0 {
                0.0
            } else {
                hits as f64 / reads as f64
            },
            average_access_time: if timed_ops == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(access_time_us / timed_ops)
            },
        }
    }
}
