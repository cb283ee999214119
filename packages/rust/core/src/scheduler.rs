//! Fixed-interval, single-flight trigger.
//!
//! Each tick re-reads the configuration, reconfigures the coordinator when it
//! changed, and runs one sweep inline. Runs never overlap: ticks that fall
//! due while a run is in progress are skipped, not queued.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use nodecounter_shared::{AppConfig, NodeCounterError, Result, RunConfig};
use nodecounter_storage::Repository;

use crate::coordinator::RunCoordinator;

/// Produces the current configuration on every tick.
pub type ConfigLoader = Box<dyn Fn() -> Result<AppConfig> + Send + Sync>;

/// Totals for one scheduler lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub runs: u64,
    pub failed_runs: u64,
    pub reconfigurations: u64,
}

pub struct Scheduler {
    repo: Arc<dyn Repository>,
    loader: ConfigLoader,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn Repository>, loader: ConfigLoader) -> Self {
        Self { repo, loader }
    }

    /// Tick until `shutdown` resolves, then drain the worker pool.
    ///
    /// Refuses to start when the job is disabled. A run in progress when
    /// `shutdown` fires is allowed to finish.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<ScheduleSummary> {
        let mut current = (self.loader)()?;
        if !current.job.enabled {
            return Err(NodeCounterError::config(
                "job is disabled; set [job] enabled = true to schedule runs",
            ));
        }

        let mut coordinator =
            RunCoordinator::new(Arc::clone(&self.repo), RunConfig::try_from(&current)?)?;
        let mut ticker = build_ticker(current.job.interval_secs, Instant::now());
        let mut summary = ScheduleSummary::default();
        info!(
            interval_secs = current.job.interval_secs,
            root = %current.job.root_path,
            "scheduler started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            match (self.loader)() {
                Ok(fresh) if fresh != current => {
                    if fresh.job.interval_secs != current.job.interval_secs {
                        let period = Duration::from_secs(fresh.job.interval_secs.max(1));
                        ticker = build_ticker(fresh.job.interval_secs, Instant::now() + period);
                    }
                    match RunConfig::try_from(&fresh).and_then(|rc| coordinator.reconfigure(rc)) {
                        Ok(_) => {
                            summary.reconfigurations += 1;
                            info!("configuration changed, applied to subsequent runs");
                        }
                        Err(e) => warn!(error = %e, "new configuration rejected, keeping previous"),
                    }
                    current = fresh;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "could not reload configuration, keeping previous"),
            }

            if !current.job.enabled {
                debug!("job disabled, skipping tick");
                continue;
            }

            match coordinator.run_once().await {
                Ok(_) => summary.runs += 1,
                Err(e) => {
                    summary.failed_runs += 1;
                    error!(error = %e, "run failed");
                }
            }
        }

        info!(runs = summary.runs, failed = summary.failed_runs, "scheduler stopping");
        coordinator.shutdown().await;
        Ok(summary)
    }
}

fn build_ticker(interval_secs: u64, start: Instant) -> Interval {
    let mut ticker = tokio::time::interval_at(start, Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
