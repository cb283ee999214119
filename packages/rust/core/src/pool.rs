//! Bounded worker pool with a replace-and-drain lifecycle.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::debug;

use nodecounter_shared::{NodeCounterError, Result};

/// Runs at most `size` submitted tasks at a time.
///
/// Closing a pool rejects new submissions; tasks already submitted keep
/// running (or waiting for a permit) until they finish on their own.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks submitted and not yet finished, including queued ones.
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Submit a task. It starts once a worker slot is free.
    pub fn submit<F>(&self, task: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(NodeCounterError::PoolClosed);
        }
        let permits = Arc::clone(&self.permits);
        Ok(self.tracker.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            task.await
        }))
    }

    /// Stop accepting work.
    pub fn close(&self) {
        self.tracker.close();
    }

    /// Stop accepting work and wait for everything submitted to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        debug!(active = self.tracker.len(), "draining worker pool");
        self.tracker.wait().await;
    }
}
