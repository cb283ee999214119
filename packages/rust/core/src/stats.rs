//! Run-scoped counters shared by all workers.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use nodecounter_shared::RunReport;

/// Lock-free statistics for one run.
///
/// Every mutation is an independent relaxed `fetch_add`. A page counts as
/// processed only once its outcome is settled (committed, skipped or failed),
/// so `processed = updated + skipped + failed` holds for any snapshot, even
/// while a timed-out batch is still finishing in the background.
#[derive(Debug)]
pub struct RunStats {
    run_id: Uuid,
    start_time: DateTime<Utc>,
    pages_discovered: AtomicU64,
    pages_processed: AtomicU64,
    pages_updated: AtomicU64,
    pages_skipped: AtomicU64,
    pages_failed: AtomicU64,
    total_nodes_counted: AtomicU64,
    batches_total: AtomicU64,
    batches_timed_out: AtomicU64,
    batches_failed: AtomicU64,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            start_time: Utc::now(),
            pages_discovered: AtomicU64::new(0),
            pages_processed: AtomicU64::new(0),
            pages_updated: AtomicU64::new(0),
            pages_skipped: AtomicU64::new(0),
            pages_failed: AtomicU64::new(0),
            total_nodes_counted: AtomicU64::new(0),
            batches_total: AtomicU64::new(0),
            batches_timed_out: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn add_discovered(&self, n: u64) {
        self.pages_discovered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_processed(&self, n: u64) {
        self.pages_processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_updated(&self, n: u64) {
        self.pages_updated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_skipped(&self, n: u64) {
        self.pages_skipped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_failed(&self, n: u64) {
        self.pages_failed.fetch_add(n, Ordering::Relaxed);
    }

    /// Record `n` pages whose annotations were committed.
    pub fn settle_updated(&self, n: u64) {
        self.add_updated(n);
        self.add_processed(n);
    }

    pub fn settle_skipped(&self, n: u64) {
        self.add_skipped(n);
        self.add_processed(n);
    }

    pub fn settle_failed(&self, n: u64) {
        self.add_failed(n);
        self.add_processed(n);
    }

    pub fn add_nodes(&self, n: u64) {
        self.total_nodes_counted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_batches(&self, n: u64) {
        self.batches_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn batch_timed_out(&self) {
        self.batches_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters, stamping the end time now.
    pub fn report(&self) -> RunReport {
        let end_time = Utc::now();
        RunReport {
            run_id: self.run_id,
            pages_discovered: self.pages_discovered.load(Ordering::Relaxed),
            pages_processed: self.pages_processed.load(Ordering::Relaxed),
            pages_updated: self.pages_updated.load(Ordering::Relaxed),
            pages_skipped: self.pages_skipped.load(Ordering::Relaxed),
            pages_failed: self.pages_failed.load(Ordering::Relaxed),
            total_nodes_counted: self.total_nodes_counted.load(Ordering::Relaxed),
            batches_total: self.batches_total.load(Ordering::Relaxed),
            batches_timed_out: self.batches_timed_out.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            start_time: self.start_time,
            end_time,
            duration_ms: (end_time - self.start_time).num_milliseconds(),
        }
    }
}
