//! Batch partitioning and parallel dispatch.
//!
//! The orchestrator caps the page set, cuts it into consecutive batches and
//! hands each batch to the worker pool. A worker owns its batch end to end:
//! one session, pages in discovery order, windowed commits.
//!
//! Each batch has a deadline measured from its start. The orchestrator waits
//! on a batch only until then; past it, the batch is counted as timed out and
//! left to wind down in the background. The worker checks for cancellation
//! between pages only, so the page in flight completes and whatever it has
//! already processed is committed before it returns.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use nodecounter_counter::{CountMethod, Counter, CounterOptions};
use nodecounter_shared::{PageRef, Result, RunConfig};
use nodecounter_storage::Repository;

use crate::pool::WorkerPool;
use crate::progress::RunProgress;
use crate::stats::RunStats;
use crate::writer::{Flush, FlushError, Outcome, Writer};

/// Smallest batch, amortizing per-batch session overhead.
pub const MIN_BATCH_SIZE: usize = 10;

/// `max(10, total / (workers * 4))`.
pub fn batch_size(total: usize, worker_count: usize) -> usize {
    let workers = worker_count.max(1);
    (total / workers.saturating_mul(4)).max(MIN_BATCH_SIZE)
}

/// Keep the first `max` pages in discovery order. `0` keeps everything.
pub fn truncate(pages: &mut Vec<PageRef>, max: usize) {
    if max > 0 && pages.len() > max {
        pages.truncate(max);
    }
}

/// Split `pages` into consecutive batches of [`batch_size`].
pub fn partition(pages: Vec<PageRef>, worker_count: usize) -> Vec<Vec<PageRef>> {
    let size = batch_size(pages.len(), worker_count);
    let mut batches = Vec::with_capacity(pages.len().div_ceil(size));
    let mut pages = pages.into_iter().peekable();
    while pages.peek().is_some() {
        batches.push(pages.by_ref().take(size).collect());
    }
    batches
}

/// What happened to one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Annotations buffered; durable once the window commits.
    Updated,
    Skipped,
    Failed(String),
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed,
    /// The deadline passed; the remainder was left unprocessed.
    TimedOut,
    /// No session could be opened; nothing was attempted.
    SessionUnavailable,
}

struct BatchContext {
    repo: Arc<dyn Repository>,
    config: Arc<RunConfig>,
    counter: Arc<Counter>,
    stats: Arc<RunStats>,
}

/// Dispatches batches of pages to a [`WorkerPool`].
pub struct Orchestrator {
    repo: Arc<dyn Repository>,
    config: Arc<RunConfig>,
    pool: WorkerPool,
}

impl Orchestrator {
    pub fn new(repo: Arc<dyn Repository>, config: Arc<RunConfig>, pool: WorkerPool) -> Self {
        Self { repo, config, pool }
    }

    /// Process `pages` and wait for every batch to finish or time out.
    #[instrument(skip_all, fields(run_id = %stats.run_id()))]
    pub async fn run(&self, mut pages: Vec<PageRef>, stats: &Arc<RunStats>, progress: &dyn RunProgress) {
        let discovered = pages.len();
        truncate(&mut pages, self.config.max_pages_per_run);
        if pages.len() < discovered {
            info!(
                discovered,
                max_pages_per_run = self.config.max_pages_per_run,
                "page set truncated"
            );
        }

        let batches = partition(pages, self.config.worker_count);
        let total = batches.len();
        stats.add_batches(total as u64);
        info!(
            batches = total,
            batch_size = batches.first().map(Vec::len).unwrap_or(0),
            workers = self.pool.size(),
            "dispatching batches"
        );

        let ctx = Arc::new(BatchContext {
            repo: Arc::clone(&self.repo),
            config: Arc::clone(&self.config),
            counter: Arc::new(Counter::new(
                CounterOptions::from(self.config.as_ref()),
                self.repo.estimator(),
            )),
            stats: Arc::clone(stats),
        });

        let mut handles: Vec<(usize, CancellationToken, JoinHandle<BatchOutcome>)> =
            Vec::with_capacity(total);
        for (index, batch) in batches.into_iter().enumerate() {
            let size = batch.len();
            let deadline = CancellationToken::new();
            match self
                .pool
                .submit(run_batch(Arc::clone(&ctx), index, batch, deadline.clone()))
            {
                Ok(handle) => handles.push((index, deadline, handle)),
                Err(e) => {
                    warn!(batch = index, pages = size, error = %e, "batch not submitted");
                    stats.batch_failed();
                }
            }
        }

        for (finished, (index, deadline, mut handle)) in handles.into_iter().enumerate() {
            let joined = tokio::select! {
                biased;
                joined = &mut handle => joined,
                _ = deadline.cancelled() => {
                    warn!(batch = index, "batch deadline passed, not waiting for it");
                    Ok(BatchOutcome::TimedOut)
                }
            };
            match joined {
                Ok(BatchOutcome::Completed) => {}
                Ok(BatchOutcome::TimedOut) => stats.batch_timed_out(),
                Ok(BatchOutcome::SessionUnavailable) => stats.batch_failed(),
                Err(e) => {
                    error!(batch = index, error = %e, "batch task aborted");
                    stats.batch_failed();
                }
            }
            progress.batch_finished(finished + 1, total);
        }
    }
}

/// Process one batch on its own session.
///
/// `deadline` is cancelled once `batch_timeout` has elapsed since the batch
/// started.
#[instrument(skip_all, fields(batch = index, pages = pages.len()))]
async fn run_batch(
    ctx: Arc<BatchContext>,
    index: usize,
    pages: Vec<PageRef>,
    deadline: CancellationToken,
) -> BatchOutcome {
    let watchdog = tokio::spawn({
        let deadline = deadline.clone();
        let timeout = ctx.config.batch_timeout;
        async move {
            tokio::time::sleep(timeout).await;
            deadline.cancel();
        }
    });

    let session = match ctx.repo.open_session().await {
        Ok(session) => session,
        Err(e) => {
            watchdog.abort();
            error!(error = %e, "could not open session, skipping batch");
            return BatchOutcome::SessionUnavailable;
        }
    };

    let mut writer = Writer::new(session, ctx.config.batch_commit_size);
    let mut outcome = BatchOutcome::Completed;

    for (i, page) in pages.iter().enumerate() {
        if deadline.is_cancelled() {
            warn!(
                processed = i,
                remaining = pages.len() - i,
                "batch deadline reached, leaving remainder unprocessed"
            );
            outcome = BatchOutcome::TimedOut;
            break;
        }

        match process_page(&ctx, &mut writer, page).await {
            // Counted as processed once committed.
            PageOutcome::Updated => {}
            PageOutcome::Skipped => ctx.stats.settle_skipped(1),
            PageOutcome::Failed(reason) => {
                warn!(page = %page, %reason, "page failed");
                ctx.stats.settle_failed(1);
                let dropped = writer.discard();
                if dropped > 0 {
                    warn!(dropped, "uncommitted updates dropped with the session reset");
                    ctx.stats.settle_failed(dropped as u64);
                }
            }
        }

        record_flush(&ctx.stats, writer.flush_if_threshold_reached().await);
    }

    record_flush(&ctx.stats, writer.flush_remaining().await);
    watchdog.abort();
    if deadline.is_cancelled() {
        outcome = BatchOutcome::TimedOut;
    }

    debug!(outcome = ?outcome, "batch finished");
    outcome
}

async fn process_page(ctx: &BatchContext, writer: &mut Writer, page: &PageRef) -> PageOutcome {
    match measure_and_apply(ctx, writer, page).await {
        Ok(outcome) => outcome,
        Err(e) => PageOutcome::Failed(e.to_string()),
    }
}

async fn measure_and_apply(
    ctx: &BatchContext,
    writer: &mut Writer,
    page: &PageRef,
) -> Result<PageOutcome> {
    let content_path = page.content_path(&ctx.config.content_node);
    if writer.session().resolve(&content_path).await?.is_none() {
        debug!(page = %page, "page has no content node");
        return Ok(PageOutcome::Skipped);
    }

    let measurement = ctx.counter.count(writer.session(), &content_path).await?;
    if let CountMethod::Unavailable { reason } = &measurement.method {
        error!(page = %page, %reason, "node count unavailable, classifying with a count of 0");
    }
    ctx.stats.add_nodes(measurement.result.node_count);

    Ok(match writer.apply(&content_path, &measurement.result).await? {
        Outcome::Updated => PageOutcome::Updated,
        Outcome::Skipped => PageOutcome::Skipped,
    })
}

fn record_flush(stats: &RunStats, flush: std::result::Result<Flush, FlushError>) {
    match flush {
        Ok(Flush::Committed(n)) => stats.settle_updated(n as u64),
        Ok(Flush::Idle) => {}
        Err(e) => {
            error!(error = %e, "commit failed, updates in this window will not be retried");
            stats.settle_failed(e.discarded as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use nodecounter_shared::{COMPLEXITY_PROPERTY, NODE_COUNT_PROPERTY, PropertyValue};
    use nodecounter_storage::MemoryRepository;

    use crate::fixtures::{flat_site, page_refs};
    use crate::progress::SilentProgress;

    fn refs(n: usize) -> Vec<PageRef> {
        (0..n).map(|i| PageRef::new(format!("/p/{i}"))).collect()
    }

    #[test]
    fn batch_size_rule() {
        assert_eq!(batch_size(0, 4), 10);
        assert_eq!(batch_size(100, 4), 10);
        assert_eq!(batch_size(1000, 4), 62);
        assert_eq!(batch_size(1000, 1), 250);
        assert_eq!(batch_size(1000, 0), 250);
    }

    #[test]
    fn partition_covers_every_page_once() {
        for (n, workers) in [(0, 3), (7, 1), (10, 4), (95, 2), (1001, 4), (5000, 7)] {
            let input = refs(n);
            let batches = partition(input.clone(), workers);
            let size = batch_size(n, workers);

            assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
            let flat: Vec<PageRef> = batches.into_iter().flatten().collect();
            assert_eq!(flat, input, "n={n} workers={workers}");
            let unique: HashSet<_> = flat.iter().collect();
            assert_eq!(unique.len(), n);
        }
    }

    #[test]
    fn truncation_keeps_discovery_order() {
        let mut pages = refs(30);
        truncate(&mut pages, 12);
        assert_eq!(pages, refs(12));

        let mut pages = refs(30);
        truncate(&mut pages, 0);
        assert_eq!(pages.len(), 30);
    }

    fn config(workers: usize) -> Arc<RunConfig> {
        let mut config = RunConfig::new("/content");
        config.worker_count = workers;
        config.batch_commit_size = 5;
        Arc::new(config)
    }

    async fn run(repo: &MemoryRepository, config: Arc<RunConfig>, pages: Vec<PageRef>) -> Arc<RunStats> {
        let (stats, pool) = run_detached(repo, config, pages).await;
        pool.drain().await;
        stats
    }

    /// Run without draining, so timed-out batches may still be winding down.
    async fn run_detached(
        repo: &MemoryRepository,
        config: Arc<RunConfig>,
        pages: Vec<PageRef>,
    ) -> (Arc<RunStats>, WorkerPool) {
        let stats = Arc::new(RunStats::new());
        let pool = WorkerPool::new(config.worker_count);
        Orchestrator::new(Arc::new(repo.clone()), config, pool.clone())
            .run(pages, &stats, &SilentProgress)
            .await;
        (stats, pool)
    }

    fn slow_config(timeout: Duration) -> Arc<RunConfig> {
        let mut cfg = RunConfig::new("/content");
        cfg.worker_count = 1;
        cfg.batch_commit_size = 50;
        cfg.batch_timeout = timeout;
        Arc::new(cfg)
    }

    #[tokio::test]
    async fn processes_every_page() {
        let repo = flat_site(45, 3);
        let stats = run(&repo, config(2), page_refs(45)).await;

        let report = stats.report();
        assert_eq!(report.pages_processed, 45);
        assert_eq!(report.pages_updated, 45);
        assert_eq!(report.pages_failed, 0);
        assert_eq!(report.batches_total, 5);
        assert_eq!(report.total_nodes_counted, 45 * 3);
        assert_eq!(
            repo.property("/content/p7/jcr:content", NODE_COUNT_PROPERTY),
            Some(PropertyValue::Long(3))
        );
        assert_eq!(
            repo.property("/content/p7/jcr:content", COMPLEXITY_PROPERTY),
            Some(PropertyValue::String("low".into()))
        );
    }

    #[tokio::test]
    async fn per_page_failure_does_not_abort_batch() {
        let repo = flat_site(10, 2);
        repo.faults().fail_reads_under("/content/p4/jcr:content");
        let stats = run(&repo, config(1), page_refs(10)).await;

        let report = stats.report();
        assert_eq!(report.pages_processed, 10);
        // p0..p3 were pending in the same window and are lost with the reset.
        assert_eq!(report.pages_failed, 5);
        assert_eq!(report.pages_updated, 5);
        assert_eq!(
            report.pages_processed,
            report.pages_updated + report.pages_skipped + report.pages_failed
        );
        assert!(repo.property("/content/p9/jcr:content", NODE_COUNT_PROPERTY).is_some());
        assert!(repo.property("/content/p0/jcr:content", NODE_COUNT_PROPERTY).is_none());
    }

    #[tokio::test]
    async fn commit_failure_loses_one_window() {
        let repo = flat_site(20, 2);
        repo.faults().fail_next_commits(1);
        let stats = run(&repo, config(1), page_refs(20)).await;

        let report = stats.report();
        assert_eq!(report.pages_processed, 20);
        assert_eq!(report.pages_failed, 5);
        assert_eq!(report.pages_updated, 15);

        let unannotated = page_refs(20)
            .iter()
            .filter(|p| {
                repo.property(&p.content_path("jcr:content"), NODE_COUNT_PROPERTY)
                    .is_none()
            })
            .count();
        assert_eq!(unannotated, 5);
    }

    #[tokio::test]
    async fn session_failure_skips_batches() {
        let repo = flat_site(20, 2);
        repo.faults().fail_sessions(true);
        let stats = run(&repo, config(2), page_refs(20)).await;

        let report = stats.report();
        assert_eq!(report.batches_total, 2);
        assert_eq!(report.batches_failed, 2);
        assert_eq!(report.pages_processed, 0);
    }

    #[tokio::test]
    async fn pages_without_content_are_skipped() {
        let repo = flat_site(10, 2);
        let mut pages = page_refs(10);
        pages.push(PageRef::new("/content"));
        let stats = run(&repo, config(1), pages).await;

        let report = stats.report();
        assert_eq!(report.pages_processed, 11);
        assert_eq!(report.pages_skipped, 1);
        assert_eq!(report.pages_updated, 10);
    }

    #[tokio::test]
    async fn deadline_stops_between_pages() {
        // Each page takes several delayed reads, well past the 50ms deadline.
        let repo = flat_site(30, 2);
        repo.faults().delay_reads(Duration::from_millis(20));
        let stats = run(&repo, slow_config(Duration::from_millis(50)), page_refs(30)).await;

        let report = stats.report();
        assert_eq!(report.batches_total, 3);
        assert_eq!(report.batches_timed_out, 3);
        // One page per batch was in flight at the deadline and still committed.
        assert_eq!(report.pages_processed, 3);
        assert_eq!(report.pages_updated, 3);
        assert!(repo.property("/content/p0/jcr:content", NODE_COUNT_PROPERTY).is_some());
        assert!(repo.property("/content/p1/jcr:content", NODE_COUNT_PROPERTY).is_none());
    }

    #[tokio::test]
    async fn slow_page_does_not_hold_the_run_past_its_deadline() {
        // About 20 delayed reads for the single page: roughly a second.
        let repo = flat_site(1, 20);
        repo.faults().delay_reads(Duration::from_millis(50));

        let started = std::time::Instant::now();
        let (stats, pool) =
            run_detached(&repo, slow_config(Duration::from_millis(100)), page_refs(1)).await;
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(600), "waited {elapsed:?}");
        let report = stats.report();
        assert_eq!(report.batches_timed_out, 1);
        assert_eq!(report.pages_processed, 0);
        assert_eq!(
            report.pages_processed,
            report.pages_updated + report.pages_skipped + report.pages_failed
        );

        // The page in flight finishes in the background and is committed.
        pool.drain().await;
        let settled = stats.report();
        assert_eq!(settled.pages_processed, 1);
        assert_eq!(settled.pages_updated, 1);
        assert_eq!(settled.batches_timed_out, 1);
        assert_eq!(
            repo.property("/content/p0/jcr:content", NODE_COUNT_PROPERTY),
            Some(PropertyValue::Long(20))
        );
    }

    #[tokio::test]
    async fn batch_overrunning_on_its_last_page_counts_as_timed_out() {
        let repo = flat_site(1, 10);
        repo.faults().delay_reads(Duration::from_millis(20));
        let config = slow_config(Duration::from_millis(50));
        let stats = Arc::new(RunStats::new());
        let ctx = Arc::new(BatchContext {
            repo: Arc::new(repo.clone()),
            counter: Arc::new(Counter::new(CounterOptions::from(config.as_ref()), None)),
            config,
            stats: Arc::clone(&stats),
        });

        let outcome = run_batch(ctx, 0, page_refs(1), CancellationToken::new()).await;
        assert_eq!(outcome, BatchOutcome::TimedOut);
        assert_eq!(stats.report().pages_updated, 1);
    }
}
