//! Descendant-node counting and complexity classification.
//!
//! A page's complexity is the number of nodes below its content node,
//! excluding any nested page together with its entire subtree. Counts come
//! from one of three sources:
//!
//! 1. the repository's approximate estimator, when it offers one
//! 2. a bounded structural query, when the estimator has no answer
//! 3. an exact explicit-stack traversal, when no estimator exists at all

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use nodecounter_shared::{ComplexityResult, Result, RunConfig, Thresholds};
use nodecounter_storage::{Estimate, Estimator, Node, Session, StructuralQuery};

/// Default cap on paths returned by the bounded descendant query.
pub const DEFAULT_QUERY_LIMIT: usize = 10_000;

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// How a count was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum CountMethod {
    /// Approximate statistics lookup.
    Estimated,
    /// Indexed descendant query capped at the query limit.
    BoundedQuery,
    /// Exact walk of the content subtree.
    Traversal,
    /// Every strategy failed; the count is 0.
    Unavailable { reason: String },
}

impl CountMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Estimated => "estimated",
            Self::BoundedQuery => "bounded_query",
            Self::Traversal => "traversal",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

impl fmt::Display for CountMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified count and its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub result: ComplexityResult,
    pub method: CountMethod,
}

// ---------------------------------------------------------------------------
// Counter
// ---------------------------------------------------------------------------

/// Counting parameters taken from a run's configuration.
#[derive(Debug, Clone)]
pub struct CounterOptions {
    pub page_type: String,
    pub thresholds: Thresholds,
    /// Cap for the bounded descendant query.
    pub query_limit: usize,
    /// Stop the exact traversal once the count passes the high threshold.
    pub early_stop: bool,
}

impl From<&RunConfig> for CounterOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            page_type: config.page_type.clone(),
            thresholds: config.thresholds,
            query_limit: config.query_limit,
            early_stop: config.traversal_early_stop,
        }
    }
}

/// Computes [`Measurement`]s for page content nodes.
pub struct Counter {
    options: CounterOptions,
    estimator: Option<Arc<dyn Estimator>>,
}

impl Counter {
    pub fn new(options: CounterOptions, estimator: Option<Arc<dyn Estimator>>) -> Self {
        Self { options, estimator }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.options.thresholds
    }

    /// Count and classify the subtree below `content_path`.
    ///
    /// With an estimator, never fails: an exhausted fallback chain yields a
    /// count of 0 with [`CountMethod::Unavailable`]. Without one, traversal
    /// errors propagate.
    #[instrument(skip_all, fields(path = %content_path))]
    pub async fn count(&self, session: &dyn Session, content_path: &str) -> Result<Measurement> {
        let (node_count, method) = match &self.estimator {
            Some(estimator) => self.approximate(estimator.as_ref(), session, content_path).await,
            None => {
                let stop_after = self
                    .options
                    .early_stop
                    .then(|| self.options.thresholds.high.saturating_add(1));
                let n = count_descendants(session, content_path, &self.options.page_type, stop_after)
                    .await?;
                (n, CountMethod::Traversal)
            }
        };

        debug!(node_count, method = method.as_str(), "counted");
        Ok(Measurement {
            result: ComplexityResult::classify(node_count, &self.options.thresholds),
            method,
        })
    }

    async fn approximate(
        &self,
        estimator: &dyn Estimator,
        session: &dyn Session,
        content_path: &str,
    ) -> (u64, CountMethod) {
        match estimator.estimate(content_path).await {
            Ok(Estimate::Count(n)) => return (n, CountMethod::Estimated),
            Ok(Estimate::Unavailable) => debug!("no estimate, using bounded query"),
            Err(e) => debug!(error = %e, "estimator failed, using bounded query"),
        }

        let query = StructuralQuery::Descendants {
            root: content_path.to_string(),
            exclude_type: self.options.page_type.clone(),
            limit: self.options.query_limit,
        };
        match session.query(&query).await {
            Ok(paths) => (paths.len() as u64, CountMethod::BoundedQuery),
            Err(e) => (
                0,
                CountMethod::Unavailable {
                    reason: e.to_string(),
                },
            ),
        }
    }
}

/// Exact number of nodes below `root`, skipping `page_type` nodes and their
/// subtrees. Stops once the count reaches `stop_after`, when given.
pub async fn count_descendants(
    session: &dyn Session,
    root: &str,
    page_type: &str,
    stop_after: Option<u64>,
) -> Result<u64> {
    let limit = stop_after.unwrap_or(u64::MAX);
    let mut count = 0u64;
    let mut stack: Vec<Node> = session.children(root).await?;

    while let Some(node) = stack.pop() {
        if node.is_page(page_type) {
            continue;
        }
        count += 1;
        if count >= limit {
            break;
        }
        stack.extend(session.children(&node.path).await?);
    }

    Ok(count)
}
