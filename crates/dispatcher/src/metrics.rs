//! Per-destination dispatch metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single destination's publish queue
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Batches the adapter accepted
    batches_published: AtomicU64,
    /// Records inside those batches
    records_published: AtomicU64,
    /// Adapter errors and panics
    failure_count: AtomicU64,
    /// Batches discarded because the queue was full
    dropped_count: AtomicU64,
    /// Batches refused because the queue was closed
    rejected_count: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn batches_published(&self) -> u64 {
        self.batches_published.load(Ordering::Relaxed)
    }

    pub fn records_published(&self) -> u64 {
        self.records_published.load(Ordering::Relaxed)
    }

    /// Count one successful publish of `records` records
    pub fn inc_published(&self, records: usize) {
        self.batches_published.fetch_add(1, Ordering::Relaxed);
        self.records_published
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn inc_dropped_count(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    pub fn inc_rejected_count(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            batches_published: self.batches_published(),
            records_published: self.records_published(),
            failure_count: self.failure_count(),
            dropped_count: self.dropped_count(),
            rejected_count: self.rejected_count(),
        }
    }
}

/// Snapshot of dispatch metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub batches_published: u64,
    pub records_published: u64,
    pub failure_count: u64,
    pub dropped_count: u64,
    pub rejected_count: u64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "published={} ({} records), failed={}, dropped={}, rejected={}, queued={}",
            self.batches_published,
            self.records_published,
            self.failure_count,
            self.dropped_count,
            self.rejected_count,
            self.queue_len
        )
    }
}
