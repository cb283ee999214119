//! Content repository capability and its backends.
//!
//! The engine talks to a hierarchical content repository only through the
//! traits defined here:
//! - [`Repository`] hands out exclusive [`Session`]s and optionally an
//!   approximate-count [`Estimator`]
//! - [`Session`] reads nodes and properties, runs [`StructuralQuery`]s, and
//!   buffers property writes until [`Session::commit`]
//!
//! Two backends are provided:
//! - [`SqlRepository`]: Turso Embedded / libSQL file (read-write, sole writer)
//! - [`MemoryRepository`]: in-process tree with failure injection

mod memory;
mod migrations;
mod sql;
mod tree;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodecounter_shared::{PropertyValue, Result};

pub use memory::{Faults, MemoryEstimator, MemoryRepository};
pub use sql::SqlRepository;
pub use tree::TreeNode;

/// Primary type assigned to the repository root node.
pub const ROOT_NODE_TYPE: &str = "rep:root";

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Read-only view of a repository node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub path: String,
    pub name: String,
    pub primary_type: String,
    pub resource_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Node {
    /// A node is a page when either of its types is the page type.
    pub fn is_page(&self, page_type: &str) -> bool {
        self.primary_type == page_type || self.resource_type.as_deref() == Some(page_type)
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Content-modification filter applied to page discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifiedSince {
    /// Name of the page child whose modification time is compared.
    pub content_node: String,
    /// Only pages whose content changed at or after this instant match.
    pub cutoff: DateTime<Utc>,
}

/// Indexed structural queries a repository can answer with paths.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralQuery {
    /// Page-type descendants of `root` (root excluded).
    Pages {
        root: String,
        page_type: String,
        modified_since: Option<ModifiedSince>,
    },
    /// Descendants of `root`, skipping any `exclude_type` node together with
    /// its subtree, capped at `limit` paths.
    Descendants {
        root: String,
        exclude_type: String,
        limit: usize,
    },
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Result of an approximate count lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimate {
    Count(u64),
    Unavailable,
}

/// Approximate-statistics capability answering in O(1) per path.
#[async_trait]
pub trait Estimator: Send + Sync {
    async fn estimate(&self, path: &str) -> Result<Estimate>;
}

/// A repository that hands out independent sessions.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Open a new session. Sessions are never shared between workers.
    async fn open_session(&self) -> Result<Box<dyn Session>>;

    /// Approximate-count capability, if the backend offers one.
    fn estimator(&self) -> Option<Arc<dyn Estimator>>;
}

/// An exclusive unit of repository access with buffered writes.
#[async_trait]
pub trait Session: Send + Sync {
    async fn resolve(&self, path: &str) -> Result<Option<Node>>;

    /// Children of `path` in repository order.
    async fn children(&self, path: &str) -> Result<Vec<Node>>;

    async fn query(&self, query: &StructuralQuery) -> Result<Vec<String>>;

    /// Read a property, observing this session's own buffered writes.
    async fn read_property(&self, path: &str, key: &str) -> Result<Option<PropertyValue>>;

    /// Buffer a property write. Not durable until [`Session::commit`].
    async fn write_property(&mut self, path: &str, key: &str, value: PropertyValue) -> Result<()>;

    /// Persist all buffered writes atomically.
    async fn commit(&mut self) -> Result<()>;

    /// Drop buffered writes without closing the session.
    fn reset_pending(&mut self);

    /// Number of buffered property writes.
    fn pending_writes(&self) -> usize;
}

/// A buffered property write.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub path: String,
    pub key: String,
    pub value: PropertyValue,
}

/// Latest buffered value for `(path, key)`, if any.
pub(crate) fn pending_value<'a>(
    pending: &'a [PendingWrite],
    path: &str,
    key: &str,
) -> Option<&'a PropertyValue> {
    pending
        .iter()
        .rev()
        .find(|w| w.path == path && w.key == key)
        .map(|w| &w.value)
}
