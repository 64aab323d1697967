//! Export counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the export counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExportStatsSnapshot {
    /// Normal-lane batches accepted by the sink.
    pub batches_exported: u64,
    /// Events inside accepted batches.
    pub events_exported: u64,
    /// Normal-lane batches discarded after exhausting retries.
    pub batches_failed: u64,
    /// Events inside discarded batches.
    pub events_failed: u64,
    /// Priority events accepted by the sink.
    pub priority_exported: u64,
    /// Priority events discarded after exhausting retries.
    pub priority_failed: u64,
    /// Normal-lane events dropped by the drop-oldest overflow policy.
    pub overflow_dropped: u64,
    /// Priority-lane events dropped by the drop-oldest overflow policy.
    pub priority_overflow_dropped: u64,
    /// Events refused because the scheduler was shut down.
    pub rejected: u64,
}

/// Lock-free export counters.
#[derive(Debug, Default)]
pub struct ExportStats {
    batches_exported: AtomicU64,
    events_exported: AtomicU64,
    batches_failed: AtomicU64,
    events_failed: AtomicU64,
    priority_exported: AtomicU64,
    priority_failed: AtomicU64,
    overflow_dropped: AtomicU64,
    priority_overflow_dropped: AtomicU64,
    rejected: AtomicU64,
}

impl ExportStats {
    pub(crate) fn batch_exported(&self, size: usize) {
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
        self.events_exported.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub(crate) fn batch_failed(&self, size: usize) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.events_failed.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub(crate) fn priority_exported(&self) {
        self.priority_exported.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn priority_failed(&self) {
        self.priority_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn overflow(&self, dropped: usize) {
        self.overflow_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub(crate) fn priority_overflow(&self, dropped: usize) {
        self.priority_overflow_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters.
    #[must_use]
    pub fn snapshot(&self) -> ExportStatsSnapshot {
        ExportStatsSnapshot {
            batches_exported: self.batches_exported.load(Ordering::Relaxed),
            events_exported: self.events_exported.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            priority_exported: self.priority_exported.load(Ordering::Relaxed),
            priority_failed: self.priority_failed.load(Ordering::Relaxed),
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
            priority_overflow_dropped: self.priority_overflow_dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
