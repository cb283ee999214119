//! Page discovery under a repository root.
//!
//! Discovery prefers the repository's indexed [`StructuralQuery::Pages`]
//! query. When the query cannot be built or fails, it falls back to a full
//! depth-first traversal that visits every node and ignores modification
//! time, trading speed for completeness.

use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use nodecounter_shared::{NodeCounterError, PageRef, Result, RunConfig};
use nodecounter_storage::{ModifiedSince, Node, Session, StructuralQuery};

// ---------------------------------------------------------------------------
// Discovery result
// ---------------------------------------------------------------------------

/// Which strategy produced a [`Discovery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Query,
    Traversal,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Traversal => "traversal",
        }
    }
}

/// Candidate pages found under a root.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub pages: Vec<PageRef>,
    pub strategy: Strategy,
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Inputs to a discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Type name marking a node as a page.
    pub page_type: String,
    /// Name of the page child whose modification time the lookback uses.
    pub content_node: String,
    /// Only pages whose content changed within this window (query path only).
    pub modified_since: Option<Duration>,
    /// Glob patterns removing matching page paths from the result.
    pub exclude_patterns: Vec<String>,
}

impl From<&RunConfig> for DiscoveryOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            page_type: config.page_type.clone(),
            content_node: config.content_node.clone(),
            modified_since: config.only_modified_since,
            exclude_patterns: config.exclude_patterns.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Discoverer
// ---------------------------------------------------------------------------

/// Enumerates page paths below a root.
pub struct Discoverer {
    options: DiscoveryOptions,
    excludes: Vec<Regex>,
}

impl Discoverer {
    pub fn new(options: DiscoveryOptions) -> Self {
        let excludes = options
            .exclude_patterns
            .iter()
            .filter_map(|p| {
                let re = glob_to_regex(p);
                if re.is_none() {
                    warn!(pattern = %p, "ignoring invalid exclude pattern");
                }
                re
            })
            .collect();
        Self { options, excludes }
    }

    /// Discover every page strictly below `root`.
    ///
    /// Fails only when `root` does not exist or when the fallback traversal
    /// itself cannot read the tree.
    #[instrument(skip_all, fields(root = %root))]
    pub async fn discover(&self, session: &dyn Session, root: &str) -> Result<Discovery> {
        if session.resolve(root).await?.is_none() {
            return Err(NodeCounterError::RootNotFound(root.to_string()));
        }

        let (paths, strategy) = match self.query(session, root).await {
            Ok(paths) => (paths, Strategy::Query),
            Err(e) => {
                warn!(error = %e, "page query failed, falling back to traversal");
                (self.traverse(session, root).await?, Strategy::Traversal)
            }
        };

        let found = paths.len();
        let pages: Vec<PageRef> = paths
            .into_iter()
            .filter(|p| !self.is_excluded(p))
            .map(PageRef::new)
            .collect();

        info!(
            strategy = strategy.as_str(),
            found,
            excluded = found - pages.len(),
            pages = pages.len(),
            "discovery completed"
        );

        Ok(Discovery { pages, strategy })
    }

    /// Indexed page query, with the lookback filter when configured.
    async fn query(&self, session: &dyn Session, root: &str) -> Result<Vec<String>> {
        let modified_since = match self.options.modified_since {
            Some(lookback) => Some(ModifiedSince {
                content_node: self.options.content_node.clone(),
                cutoff: modified_cutoff(Utc::now(), lookback)?,
            }),
            None => None,
        };

        session
            .query(&StructuralQuery::Pages {
                root: root.to_string(),
                page_type: self.options.page_type.clone(),
                modified_since,
            })
            .await
    }

    /// Depth-first pre-order walk emitting every page below `root`.
    pub async fn traverse(&self, session: &dyn Session, root: &str) -> Result<Vec<String>> {
        let mut pages = Vec::new();
        let mut stack: Vec<Node> = session.children(root).await?.into_iter().rev().collect();
        let mut visited = 0usize;

        while let Some(node) = stack.pop() {
            visited += 1;
            if node.is_page(&self.options.page_type) {
                pages.push(node.path.clone());
            }
            let children = session.children(&node.path).await?;
            stack.extend(children.into_iter().rev());
        }

        debug!(visited, pages = pages.len(), "traversal finished");
        Ok(pages)
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.excludes.iter().any(|re| re.is_match(path))
    }
}

/// Cutoff instant for a lookback window ending at `now`.
pub fn modified_cutoff(now: DateTime<Utc>, lookback: Duration) -> Result<DateTime<Utc>> {
    let window = chrono::Duration::from_std(lookback).map_err(|_| {
        NodeCounterError::validation(format!("lookback window out of range: {lookback:?}"))
    })?;
    now.checked_sub_signed(window).ok_or_else(|| {
        NodeCounterError::validation(format!("lookback window out of range: {lookback:?}"))
    })
}

/// Convert a glob-like pattern to an anchored regex.
///
/// `**` spans path segments, `*` stays within one, `?` matches one character.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$")).ok()
}
