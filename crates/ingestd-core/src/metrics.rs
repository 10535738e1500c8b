//! Lightweight operation counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-local counters for job operations. Cheap to share behind an
/// `Arc`; all methods take `&self`.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    submitted: AtomicU64,
    batches: AtomicU64,
    finished: AtomicU64,
    failed: AtomicU64,
    stopped: AtomicU64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finished(&self) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stopped(&self) {
        self.stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.submitted.load(Ordering::Relaxed),
            batches_submitted: self.batches.load(Ordering::Relaxed),
            jobs_finished: self.finished.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            jobs_stopped: self.stopped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub batches_submitted: u64,
    pub jobs_finished: u64,
    pub jobs_failed: u64,
    pub jobs_stopped: u64,
}
