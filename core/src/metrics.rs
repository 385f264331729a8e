//! Metrics collection for cache monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cache and background queue counters.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Reads served from a snapshot within its TTL.
    pub fresh_hits: AtomicU64,
    /// Reads served from an expired snapshot.
    pub stale_hits: AtomicU64,
    /// Reads that found no snapshot and fetched synchronously.
    pub cold_starts: AtomicU64,
    /// Revalidations started by a stale read.
    pub revalidations_started: AtomicU64,
    /// Stale reads that found a revalidation already in flight.
    pub revalidations_skipped: AtomicU64,
    /// Successful fetch-and-persist runs.
    pub refreshes_succeeded: AtomicU64,
    /// Failed fetch-and-persist runs.
    pub refreshes_failed: AtomicU64,
    /// Tasks accepted by the background queue.
    pub tasks_enqueued: AtomicU64,
    /// Tasks that finished without error.
    pub tasks_processed: AtomicU64,
    /// Tasks that returned an error or panicked.
    pub tasks_failed: AtomicU64,
    /// Tasks the queue refused.
    pub enqueue_failures: AtomicU64,
}

impl CacheMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_hit(&self) {
        self.fresh_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cold_start(&self) {
        self.cold_starts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a stale read's revalidation attempt.
    pub fn revalidation(&self, started: bool) {
        if started {
            self.revalidations_started.fetch_add(1, Ordering::Relaxed);
        } else {
            self.revalidations_skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the outcome of a fetch-and-persist run.
    pub fn refresh(&self, succeeded: bool) {
        if succeeded {
            self.refreshes_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.refreshes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn task_enqueued(&self) {
        self.tasks_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a background task.
    pub fn task_finished(&self, succeeded: bool) {
        if succeeded {
            self.tasks_processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn enqueue_failed(&self) {
        self.enqueue_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            cold_starts: self.cold_starts.load(Ordering::Relaxed),
            revalidations_started: self.revalidations_started.load(Ordering::Relaxed),
            revalidations_skipped: self.revalidations_skipped.load(Ordering::Relaxed),
            refreshes_succeeded: self.refreshes_succeeded.load(Ordering::Relaxed),
            refreshes_failed: self.refreshes_failed.load(Ordering::Relaxed),
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            tasks_processed: self.tasks_processed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct CacheMetricsSnapshot {
    pub fresh_hits: u64,
    pub stale_hits: u64,
    pub cold_starts: u64,
    pub revalidations_started: u64,
    pub revalidations_skipped: u64,
    pub refreshes_succeeded: u64,
    pub refreshes_failed: u64,
    pub tasks_enqueued: u64,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub enqueue_failures: u64,
}
