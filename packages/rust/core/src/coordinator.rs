//! Single-run entry point and worker pool ownership.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, instrument};

use nodecounter_discovery::{Discoverer, DiscoveryOptions};
use nodecounter_shared::{NodeCounterError, Result, RunConfig, RunReport};
use nodecounter_storage::Repository;

use crate::orchestrator::Orchestrator;
use crate::pool::WorkerPool;
use crate::progress::{RunProgress, SilentProgress};
use crate::stats::RunStats;

/// Composes discovery and orchestration into one run.
///
/// Runs must not overlap; the trigger driving the coordinator guarantees
/// single-flight execution. Successive runs share nothing except the
/// repository's annotations and the worker pool.
pub struct RunCoordinator {
    repo: Arc<dyn Repository>,
    config: Arc<RunConfig>,
    pool: WorkerPool,
}

impl RunCoordinator {
    pub fn new(repo: Arc<dyn Repository>, config: RunConfig) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.worker_count);
        Ok(Self {
            repo,
            config: Arc::new(config),
            pool,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn run_once(&self) -> Result<RunReport> {
        self.run_with_progress(&SilentProgress).await
    }

    /// Discover, process and report one full sweep.
    ///
    /// A batch that outruns its deadline is reported as timed out and keeps
    /// winding down on the pool; pages it settles after the report is taken
    /// are not in the report.
    #[instrument(skip_all, fields(root = %self.config.root_path))]
    pub async fn run_with_progress(&self, progress: &dyn RunProgress) -> Result<RunReport> {
        if self.pool.is_closed() {
            return Err(NodeCounterError::PoolClosed);
        }
        let stats = Arc::new(RunStats::new());
        info!(
            run_id = %stats.run_id(),
            workers = self.config.worker_count,
            max_pages_per_run = self.config.max_pages_per_run,
            incremental = self.config.only_modified_since.is_some(),
            "starting run"
        );

        progress.phase("Discovering pages");
        let discovery = {
            let session = self.repo.open_session().await?;
            Discoverer::new(DiscoveryOptions::from(self.config.as_ref()))
                .discover(session.as_ref(), &self.config.root_path)
                .await?
        };
        stats.add_discovered(discovery.pages.len() as u64);

        progress.phase("Counting nodes");
        Orchestrator::new(
            Arc::clone(&self.repo),
            Arc::clone(&self.config),
            self.pool.clone(),
        )
        .run(discovery.pages, &stats, progress)
        .await;

        let report = stats.report();
        info!(
            run_id = %report.run_id,
            discovered = report.pages_discovered,
            processed = report.pages_processed,
            updated = report.pages_updated,
            skipped = report.pages_skipped,
            failed = report.pages_failed,
            nodes = report.total_nodes_counted,
            batches_timed_out = report.batches_timed_out,
            batches_failed = report.batches_failed,
            duration_ms = report.duration_ms,
            "run completed"
        );
        progress.done(&report);
        Ok(report)
    }

    /// Swap in a new configuration for subsequent runs.
    ///
    /// When the worker count changes, a fresh pool replaces the current one.
    /// The old pool is closed and drains in the background; the returned
    /// handle resolves once it is empty.
    pub fn reconfigure(&mut self, config: RunConfig) -> Result<Option<JoinHandle<()>>> {
        config.validate()?;
        let resize = config.worker_count != self.pool.size();
        self.config = Arc::new(config);
        if !resize {
            return Ok(None);
        }

        let retired = std::mem::replace(&mut self.pool, WorkerPool::new(self.config.worker_count));
        retired.close();
        info!(
            old_workers = retired.size(),
            new_workers = self.pool.size(),
            in_flight = retired.active(),
            "worker pool replaced"
        );
        Ok(Some(tokio::spawn(async move {
            retired.drain().await;
            info!("retired worker pool drained");
        })))
    }

    /// Stop accepting runs and wait for submitted work to finish.
    pub async fn shutdown(self) {
        info!(in_flight = self.pool.active(), "shutting down");
        self.pool.drain().await;
    }
}
