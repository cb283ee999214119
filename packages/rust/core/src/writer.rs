//! Annotation writer with skip-if-unchanged and windowed commits.

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use nodecounter_shared::{
    COMPLEXITY_PROPERTY, ComplexityResult, ComplexityTier, LAST_COUNTED_PROPERTY,
    NODE_COUNT_PROPERTY, NodeCounterError, PropertyValue, Result,
};
use nodecounter_storage::Session;

/// Result of applying a measurement to one content node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// New annotations were buffered in the session.
    Updated,
    /// Stored annotations already match; nothing was written.
    Skipped,
}

/// Result of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Nothing was due.
    Idle,
    /// This many page updates became durable.
    Committed(usize),
}

/// A commit failed; the flush window was discarded.
#[derive(Debug, Error)]
#[error("commit failed, {discarded} page update(s) discarded: {source}")]
pub struct FlushError {
    pub discarded: usize,
    #[source]
    pub source: NodeCounterError,
}

/// Per-batch writer owning the batch's session.
///
/// Updates are buffered and committed every `commit_size` pages, so a failed
/// commit loses at most one window.
pub struct Writer {
    session: Box<dyn Session>,
    commit_size: usize,
    pending_pages: usize,
}

impl Writer {
    pub fn new(session: Box<dyn Session>, commit_size: usize) -> Self {
        Self {
            session,
            commit_size: commit_size.max(1),
            pending_pages: 0,
        }
    }

    /// Read access for counting against the same session.
    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    /// Page updates buffered since the last commit.
    pub fn pending_pages(&self) -> usize {
        self.pending_pages
    }

    /// Buffer new annotations on `content_path` unless they are unchanged.
    pub async fn apply(&mut self, content_path: &str, result: &ComplexityResult) -> Result<Outcome> {
        let stored_count = self
            .session
            .read_property(content_path, NODE_COUNT_PROPERTY)
            .await?
            .and_then(|v| v.as_long());
        let stored_tier = self
            .session
            .read_property(content_path, COMPLEXITY_PROPERTY)
            .await?
            .and_then(|v| v.as_str().and_then(|s| s.parse::<ComplexityTier>().ok()));

        let new_count = i64::try_from(result.node_count).unwrap_or(i64::MAX);
        if stored_count == Some(new_count) && stored_tier == Some(result.tier) {
            return Ok(Outcome::Skipped);
        }

        self.session
            .write_property(content_path, NODE_COUNT_PROPERTY, PropertyValue::Long(new_count))
            .await?;
        self.session
            .write_property(
                content_path,
                COMPLEXITY_PROPERTY,
                PropertyValue::String(result.tier.as_str().to_string()),
            )
            .await?;
        self.session
            .write_property(content_path, LAST_COUNTED_PROPERTY, PropertyValue::Date(Utc::now()))
            .await?;

        self.pending_pages += 1;
        debug!(
            path = %content_path,
            old_count = ?stored_count,
            old_tier = ?stored_tier,
            new_count,
            new_tier = %result.tier,
            "annotations buffered"
        );
        Ok(Outcome::Updated)
    }

    /// Commit when the window is full.
    pub async fn flush_if_threshold_reached(&mut self) -> std::result::Result<Flush, FlushError> {
        if self.pending_pages >= self.commit_size {
            self.commit().await
        } else {
            Ok(Flush::Idle)
        }
    }

    /// Commit whatever is still buffered.
    pub async fn flush_remaining(&mut self) -> std::result::Result<Flush, FlushError> {
        if self.pending_pages == 0 && self.session.pending_writes() == 0 {
            return Ok(Flush::Idle);
        }
        self.commit().await
    }

    /// Drop all buffered writes. Returns the number of page updates lost.
    pub fn discard(&mut self) -> usize {
        self.session.reset_pending();
        std::mem::take(&mut self.pending_pages)
    }

    async fn commit(&mut self) -> std::result::Result<Flush, FlushError> {
        match self.session.commit().await {
            Ok(()) => Ok(Flush::Committed(std::mem::take(&mut self.pending_pages))),
            Err(source) => Err(FlushError {
                discarded: self.discard(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodecounter_shared::Thresholds;
    use nodecounter_storage::{MemoryRepository, Repository, TreeNode};

    const PATHS: [&str; 3] = ["/p0/jcr:content", "/p1/jcr:content", "/p2/jcr:content"];

    fn repo() -> MemoryRepository {
        let repo = MemoryRepository::new();
        for i in 0..3 {
            repo.import_tree(
                "/",
                &TreeNode::new(format!("p{i}"), "cq:Page")
                    .with_child(TreeNode::new("jcr:content", "cq:PageContent")),
            )
            .unwrap();
        }
        repo
    }

    fn result(n: u64) -> ComplexityResult {
        ComplexityResult::classify(n, &Thresholds::default())
    }

    #[tokio::test]
    async fn unchanged_annotations_are_skipped() {
        let repo = repo();
        repo.set_property(PATHS[0], NODE_COUNT_PROPERTY, PropertyValue::Long(10))
            .unwrap();
        repo.set_property(PATHS[0], COMPLEXITY_PROPERTY, PropertyValue::String("low".into()))
            .unwrap();

        let mut writer = Writer::new(repo.open_session().await.unwrap(), 10);
        assert_eq!(writer.apply(PATHS[0], &result(10)).await.unwrap(), Outcome::Skipped);
        assert_eq!(writer.session().pending_writes(), 0);

        assert_eq!(writer.apply(PATHS[0], &result(11)).await.unwrap(), Outcome::Updated);
        assert_eq!(writer.pending_pages(), 1);
    }

    #[tokio::test]
    async fn tier_change_alone_triggers_update() {
        let repo = repo();
        repo.set_property(PATHS[0], NODE_COUNT_PROPERTY, PropertyValue::Long(10))
            .unwrap();
        repo.set_property(PATHS[0], COMPLEXITY_PROPERTY, PropertyValue::String("high".into()))
            .unwrap();

        let mut writer = Writer::new(repo.open_session().await.unwrap(), 10);
        assert_eq!(writer.apply(PATHS[0], &result(10)).await.unwrap(), Outcome::Updated);
    }

    #[tokio::test]
    async fn commits_every_window() {
        let repo = repo();
        let mut writer = Writer::new(repo.open_session().await.unwrap(), 2);

        writer.apply(PATHS[0], &result(1)).await.unwrap();
        assert_eq!(writer.flush_if_threshold_reached().await.unwrap(), Flush::Idle);
        writer.apply(PATHS[1], &result(2)).await.unwrap();
        assert_eq!(
            writer.flush_if_threshold_reached().await.unwrap(),
            Flush::Committed(2)
        );
        writer.apply(PATHS[2], &result(3)).await.unwrap();
        assert_eq!(writer.flush_remaining().await.unwrap(), Flush::Committed(1));
        assert_eq!(writer.flush_remaining().await.unwrap(), Flush::Idle);

        assert_eq!(repo.faults().commits(), 2);
        assert_eq!(
            repo.property(PATHS[2], NODE_COUNT_PROPERTY),
            Some(PropertyValue::Long(3))
        );
        assert_eq!(
            repo.property(PATHS[2], COMPLEXITY_PROPERTY),
            Some(PropertyValue::String("low".into()))
        );
        assert!(repo.property(PATHS[2], LAST_COUNTED_PROPERTY).is_some());
    }

    #[tokio::test]
    async fn failed_commit_discards_window() {
        let repo = repo();
        repo.faults().fail_next_commits(1);
        let mut writer = Writer::new(repo.open_session().await.unwrap(), 2);

        writer.apply(PATHS[0], &result(1)).await.unwrap();
        writer.apply(PATHS[1], &result(2)).await.unwrap();
        let err = writer.flush_if_threshold_reached().await.unwrap_err();
        assert_eq!(err.discarded, 2);
        assert_eq!(writer.pending_pages(), 0);
        assert_eq!(writer.session().pending_writes(), 0);
        assert_eq!(repo.property(PATHS[0], NODE_COUNT_PROPERTY), None);

        writer.apply(PATHS[2], &result(3)).await.unwrap();
        assert_eq!(writer.flush_remaining().await.unwrap(), Flush::Committed(1));
        assert_eq!(
            repo.property(PATHS[2], NODE_COUNT_PROPERTY),
            Some(PropertyValue::Long(3))
        );
    }

    #[tokio::test]
    async fn discard_reports_lost_pages() {
        let repo = repo();
        let mut writer = Writer::new(repo.open_session().await.unwrap(), 10);
        writer.apply(PATHS[0], &result(1)).await.unwrap();
        writer.apply(PATHS[1], &result(2)).await.unwrap();

        assert_eq!(writer.discard(), 2);
        assert_eq!(writer.flush_remaining().await.unwrap(), Flush::Idle);
        assert_eq!(repo.faults().commits(), 0);
    }
}
