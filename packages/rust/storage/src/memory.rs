//! In-process repository backend.
//!
//! Holds the whole tree behind a lock and mirrors the libSQL backend's
//! session semantics. [`Faults`] injects failures and latency so recovery
//! paths (query fallback, commit failure, batch deadlines) can be exercised
//! without a real database.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodecounter_shared::{NodeCounterError, PropertyValue, Result};

use crate::tree::{TreeNode, flatten};
use crate::{
    Estimate, Estimator, Node, PendingWrite, ROOT_NODE_TYPE, Repository, Session,
    StructuralQuery, pending_value,
};

struct MemNode {
    node: Node,
    children: Vec<String>,
    properties: BTreeMap<String, PropertyValue>,
}

struct TreeState {
    nodes: HashMap<String, MemNode>,
}

impl TreeState {
    fn new() -> Self {
        let root = MemNode {
            node: Node {
                path: "/".into(),
                name: String::new(),
                primary_type: ROOT_NODE_TYPE.into(),
                resource_type: None,
                last_modified: None,
            },
            children: Vec::new(),
            properties: BTreeMap::new(),
        };
        Self {
            nodes: HashMap::from([("/".to_string(), root)]),
        }
    }

    fn children_of(&self, path: &str) -> Vec<&MemNode> {
        self.nodes
            .get(path)
            .map(|n| {
                n.children
                    .iter()
                    .filter_map(|c| self.nodes.get(c))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pre-order walk below `root` (root excluded). `prune` stops descent
    /// into a node and drops it from the output.
    fn walk(&self, root: &str, prune: impl Fn(&Node) -> bool, limit: usize) -> Vec<&MemNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&MemNode> = self.children_of(root).into_iter().rev().collect();

        while let Some(entry) = stack.pop() {
            if out.len() >= limit {
                break;
            }
            if prune(&entry.node) {
                continue;
            }
            out.push(entry);
            stack.extend(self.children_of(&entry.node.path).into_iter().rev());
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

/// Failure and latency injection shared by all sessions of a repository.
#[derive(Debug, Default)]
pub struct Faults {
    fail_queries: AtomicBool,
    fail_sessions: AtomicBool,
    failing_commits: AtomicUsize,
    failing_reads: Mutex<HashSet<String>>,
    read_delay_ms: AtomicU64,
    sessions_opened: AtomicUsize,
    commits: AtomicUsize,
}

impl Faults {
    /// Make every structural query fail.
    pub fn fail_queries(&self, on: bool) {
        self.fail_queries.store(on, Ordering::SeqCst);
    }

    /// Make opening a session fail.
    pub fn fail_sessions(&self, on: bool) {
        self.fail_sessions.store(on, Ordering::SeqCst);
    }

    /// Fail the next `n` non-empty commits.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Fail property reads and child listings at or below `prefix`.
    pub fn fail_reads_under(&self, prefix: impl Into<String>) {
        self.failing_reads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(prefix.into());
    }

    /// Add latency to every property read and child listing.
    pub fn delay_reads(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Sessions opened so far.
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    /// Successful non-empty commits so far.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn check_read(&self, path: &str) -> Result<()> {
        let failing = self.failing_reads.lock().unwrap_or_else(|e| e.into_inner());
        if failing
            .iter()
            .any(|prefix| path == prefix || path.starts_with(&format!("{prefix}/")))
        {
            return Err(NodeCounterError::Repository(format!(
                "injected read failure at {path}"
            )));
        }
        Ok(())
    }

    async fn read_latency(&self) {
        let ms = self.read_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Consume one injected commit failure, if any are armed.
    fn take_commit_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

/// Fixed table of approximate counts keyed by path.
#[derive(Debug, Default)]
pub struct MemoryEstimator {
    counts: Mutex<HashMap<String, u64>>,
    failing: AtomicBool,
}

impl MemoryEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: impl Into<String>, count: u64) {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), count);
    }

    /// Make every lookup return an error.
    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl Estimator for MemoryEstimator {
    async fn estimate(&self, path: &str) -> Result<Estimate> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NodeCounterError::Repository(
                "statistics service unreachable".into(),
            ));
        }
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(counts
            .get(path)
            .map(|c| Estimate::Count(*c))
            .unwrap_or(Estimate::Unavailable))
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// In-memory content repository.
#[derive(Clone)]
pub struct MemoryRepository {
    state: Arc<RwLock<TreeState>>,
    faults: Arc<Faults>,
    estimator: Option<Arc<MemoryEstimator>>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// Empty repository containing only the root node.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(TreeState::new())),
            faults: Arc::new(Faults::default()),
            estimator: None,
        }
    }

    /// Attach an approximate-count capability.
    pub fn with_estimator(mut self, estimator: Arc<MemoryEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    fn read_state(&self) -> RwLockReadGuard<'_, TreeState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, TreeState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Import `tree` as the last child of `parent`. Returns nodes written.
    pub fn import_tree(&self, parent: &str, tree: &TreeNode) -> Result<usize> {
        let rows = flatten(parent, tree)?;
        let mut state = self.write_state();
        if !state.nodes.contains_key(parent) {
            return Err(NodeCounterError::NodeNotFound(parent.to_string()));
        }

        for row in &rows {
            let path = row.node.path.clone();
            if let Some(parent_node) = state.nodes.get_mut(&row.parent_path) {
                if !parent_node.children.contains(&path) {
                    parent_node.children.push(path.clone());
                }
            }
            let children = state
                .nodes
                .remove(&path)
                .map(|existing| existing.children)
                .unwrap_or_default();
            state.nodes.insert(
                path,
                MemNode {
                    node: row.node.clone(),
                    children,
                    properties: row.properties.clone(),
                },
            );
        }
        Ok(rows.len())
    }

    /// Committed value of a property, bypassing sessions.
    pub fn property(&self, path: &str, key: &str) -> Option<PropertyValue> {
        self.read_state()
            .nodes
            .get(path)
            .and_then(|n| n.properties.get(key).cloned())
    }

    /// Set a committed property directly, bypassing sessions.
    pub fn set_property(&self, path: &str, key: &str, value: PropertyValue) -> Result<()> {
        let mut state = self.write_state();
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| NodeCounterError::NodeNotFound(path.to_string()))?;
        node.properties.insert(key.to_string(), value);
        Ok(())
    }

    /// Update a node's modification time.
    pub fn touch(&self, path: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.write_state();
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| NodeCounterError::NodeNotFound(path.to_string()))?;
        node.node.last_modified = Some(at);
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn open_session(&self) -> Result<Box<dyn Session>> {
        if self.faults.fail_sessions.load(Ordering::SeqCst) {
            return Err(NodeCounterError::Session(
                "injected session failure".into(),
            ));
        }
        self.faults.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            repo: self.clone(),
            pending: Vec::new(),
        }))
    }

    fn estimator(&self) -> Option<Arc<dyn Estimator>> {
        self.estimator
            .as_ref()
            .map(|e| Arc::clone(e) as Arc<dyn Estimator>)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct MemorySession {
    repo: MemoryRepository,
    pending: Vec<PendingWrite>,
}

#[async_trait]
impl Session for MemorySession {
    async fn resolve(&self, path: &str) -> Result<Option<Node>> {
        Ok(self
            .repo
            .read_state()
            .nodes
            .get(path)
            .map(|n| n.node.clone()))
    }

    async fn children(&self, path: &str) -> Result<Vec<Node>> {
        self.repo.faults.read_latency().await;
        self.repo.faults.check_read(path)?;
        Ok(self
            .repo
            .read_state()
            .children_of(path)
            .into_iter()
            .map(|n| n.node.clone())
            .collect())
    }

    async fn query(&self, query: &StructuralQuery) -> Result<Vec<String>> {
        if self.repo.faults.fail_queries.load(Ordering::SeqCst) {
            return Err(NodeCounterError::Query("injected query failure".into()));
        }
        let state = self.repo.read_state();

        match query {
            StructuralQuery::Pages {
                root,
                page_type,
                modified_since,
            } => {
                let pages = state
                    .walk(root, |_| false, usize::MAX)
                    .into_iter()
                    .filter(|n| n.node.is_page(page_type))
                    .filter(|n| match modified_since {
                        None => true,
                        Some(filter) => state.children_of(&n.node.path).iter().any(|c| {
                            c.node.name == filter.content_node
                                && c.node.last_modified.is_some_and(|t| t >= filter.cutoff)
                        }),
                    })
                    .map(|n| n.node.path.clone())
                    .collect();
                Ok(pages)
            }
            StructuralQuery::Descendants {
                root,
                exclude_type,
                limit,
            } => Ok(state
                .walk(root, |n| n.is_page(exclude_type), *limit)
                .into_iter()
                .map(|n| n.node.path.clone())
                .collect()),
        }
    }

    async fn read_property(&self, path: &str, key: &str) -> Result<Option<PropertyValue>> {
        self.repo.faults.read_latency().await;
        self.repo.faults.check_read(path)?;
        if let Some(value) = pending_value(&self.pending, path, key) {
            return Ok(Some(value.clone()));
        }
        Ok(self.repo.property(path, key))
    }

    async fn write_property(&mut self, path: &str, key: &str, value: PropertyValue) -> Result<()> {
        if !self.repo.read_state().nodes.contains_key(path) {
            return Err(NodeCounterError::NodeNotFound(path.to_string()));
        }
        self.pending.push(PendingWrite {
            path: path.to_string(),
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.repo.faults.take_commit_failure() {
            return Err(NodeCounterError::Repository(
                "injected commit failure".into(),
            ));
        }

        let mut state = self.repo.write_state();
        for write in self.pending.drain(..) {
            if let Some(node) = state.nodes.get_mut(&write.path) {
                node.properties.insert(write.key, write.value);
            }
        }
        self.repo.faults.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset_pending(&mut self) {
        self.pending.clear();
    }

    fn pending_writes(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModifiedSince;

    fn sample() -> MemoryRepository {
        let repo = MemoryRepository::new();
        let tree = TreeNode::new("content", "sling:Folder").with_children([
            TreeNode::new("a", "cq:Page").with_child(
                TreeNode::new("jcr:content", "cq:PageContent")
                    .with_child(TreeNode::new("x", "nt:unstructured"))
                    .with_child(
                        TreeNode::new("b", "cq:Page")
                            .with_child(TreeNode::new("jcr:content", "cq:PageContent")),
                    ),
            ),
            TreeNode::new("c", "cq:Page"),
        ]);
        repo.import_tree("/", &tree).unwrap();
        repo
    }

    #[tokio::test]
    async fn pages_query_is_preorder() {
        let repo = sample();
        let session = repo.open_session().await.unwrap();
        let pages = session
            .query(&StructuralQuery::Pages {
                root: "/content".into(),
                page_type: "cq:Page".into(),
                modified_since: None,
            })
            .await
            .unwrap();
        assert_eq!(
            pages,
            vec!["/content/a", "/content/a/jcr:content/b", "/content/c"]
        );
    }

    #[tokio::test]
    async fn descendants_skip_pages() {
        let repo = sample();
        let session = repo.open_session().await.unwrap();
        let paths = session
            .query(&StructuralQuery::Descendants {
                root: "/content/a/jcr:content".into(),
                exclude_type: "cq:Page".into(),
                limit: 100,
            })
            .await
            .unwrap();
        assert_eq!(paths, vec!["/content/a/jcr:content/x"]);
    }

    #[tokio::test]
    async fn modified_since_uses_content_child() {
        let repo = sample();
        let now = Utc::now();
        repo.touch("/content/a/jcr:content", now).unwrap();

        let session = repo.open_session().await.unwrap();
        let pages = session
            .query(&StructuralQuery::Pages {
                root: "/content".into(),
                page_type: "cq:Page".into(),
                modified_since: Some(ModifiedSince {
                    content_node: "jcr:content".into(),
                    cutoff: now - chrono::Duration::hours(1),
                }),
            })
            .await
            .unwrap();
        assert_eq!(pages, vec!["/content/a"]);
    }

    #[tokio::test]
    async fn commit_and_injected_failure() {
        let repo = sample();
        let mut session = repo.open_session().await.unwrap();
        session
            .write_property("/content/a/jcr:content", "nodeCount", PropertyValue::Long(1))
            .await
            .unwrap();

        repo.faults().fail_next_commits(1);
        assert!(session.commit().await.is_err());
        assert_eq!(session.pending_writes(), 1);
        assert_eq!(repo.property("/content/a/jcr:content", "nodeCount"), None);

        session.commit().await.unwrap();
        assert_eq!(
            repo.property("/content/a/jcr:content", "nodeCount"),
            Some(PropertyValue::Long(1))
        );
        assert_eq!(repo.faults().commits(), 1);
    }

    #[tokio::test]
    async fn injected_faults() {
        let repo = sample();
        repo.faults().fail_reads_under("/content/c");
        let session = repo.open_session().await.unwrap();
        assert!(session.children("/content/c").await.is_err());
        assert!(session.children("/content/a").await.is_ok());

        repo.faults().fail_queries(true);
        let err = session
            .query(&StructuralQuery::Pages {
                root: "/content".into(),
                page_type: "cq:Page".into(),
                modified_since: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NodeCounterError::Query(_)));

        repo.faults().fail_sessions(true);
        assert!(repo.open_session().await.is_err());
    }

    #[tokio::test]
    async fn estimator_lookup() {
        let estimator = Arc::new(MemoryEstimator::new());
        estimator.set("/content/a/jcr:content", 42);
        let repo = sample().with_estimator(Arc::clone(&estimator));

        let capability = repo.estimator().expect("estimator attached");
        assert_eq!(
            capability.estimate("/content/a/jcr:content").await.unwrap(),
            Estimate::Count(42)
        );
        assert_eq!(
            capability.estimate("/content/c/jcr:content").await.unwrap(),
            Estimate::Unavailable
        );
        estimator.fail(true);
        assert!(capability.estimate("/content/a/jcr:content").await.is_err());
    }
}
