//! Turso Embedded / libSQL repository backend (offline mode).
//!
//! Each [`SqlSession`] owns its own connection and buffers property writes
//! in memory; [`Session::commit`] flushes them in one transaction.
//! Structural queries are answered with recursive CTEs over the `nodes`
//! table, and the optional estimator reads precomputed `node_stats` rows.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use nodecounter_shared::{NodeCounterError, PropertyValue, Result};

use crate::tree::{TreeNode, flatten};
use crate::{
    Estimate, Estimator, Node, PendingWrite, Repository, Session, StructuralQuery, migrations,
    pending_value,
};

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const NODE_COLUMNS: &str = "path, name, primary_type, resource_type, last_modified";

const PAGES_SQL: &str = "SELECT n.path FROM nodes n
     WHERE substr(n.path, 1, length(?1)) = ?1 AND n.path != ?2
       AND (n.primary_type = ?3 OR n.resource_type = ?3)
     ORDER BY n.path";

const MODIFIED_PAGES_SQL: &str = "SELECT n.path FROM nodes n
     WHERE substr(n.path, 1, length(?1)) = ?1 AND n.path != ?2
       AND (n.primary_type = ?3 OR n.resource_type = ?3)
       AND EXISTS (
         SELECT 1 FROM nodes c
         WHERE c.parent_path = n.path AND c.name = ?4 AND c.last_modified >= ?5
       )
     ORDER BY n.path";

const DESCENDANTS_SQL: &str = "WITH RECURSIVE sub(path) AS (
       SELECT path FROM nodes
       WHERE parent_path = ?1 AND NOT (primary_type = ?2 OR IFNULL(resource_type, '') = ?2)
       UNION ALL
       SELECT n.path FROM nodes n JOIN sub s ON n.parent_path = s.path
       WHERE NOT (n.primary_type = ?2 OR IFNULL(n.resource_type, '') = ?2)
     )
     SELECT path FROM sub LIMIT ?3";

/// Repository backed by a local libSQL database file.
pub struct SqlRepository {
    db: Arc<Database>,
    path: PathBuf,
    statistics: AtomicBool,
}

impl SqlRepository {
    /// Open or create a repository database at `path` and migrate it.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NodeCounterError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(NodeCounterError::repository)?;

        let repo = Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
            statistics: AtomicBool::new(false),
        };

        let conn = repo.connect()?;
        run_migrations(&conn).await?;
        let has_stats = count_rows(&conn, "SELECT COUNT(*) FROM node_stats").await? > 0;
        repo.statistics.store(has_stats, Ordering::Relaxed);

        tracing::debug!(path = %repo.path.display(), statistics = has_stats, "repository opened");
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        connect(&self.db)
    }

    /// Import `tree` as the last child of `parent`. Returns the number of
    /// nodes written. Existing nodes at the same paths are overwritten.
    pub async fn import_tree(&self, parent: &str, tree: &TreeNode) -> Result<usize> {
        let conn = self.connect()?;
        if fetch_node(&conn, parent).await?.is_none() {
            return Err(NodeCounterError::NodeNotFound(parent.to_string()));
        }

        let next_ordinal = count_rows_with(
            &conn,
            "SELECT COALESCE(MAX(ordinal) + 1, 0) FROM nodes WHERE parent_path = ?1",
            parent,
        )
        .await?;

        let rows = flatten(parent, tree)?;
        let tx = conn.transaction().await.map_err(NodeCounterError::repository)?;

        for (i, row) in rows.iter().enumerate() {
            let ordinal = if i == 0 {
                next_ordinal
            } else {
                row.ordinal as i64
            };
            tx.execute(
                "INSERT INTO nodes (path, parent_path, name, ordinal, primary_type, resource_type, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(path) DO UPDATE SET
                   primary_type = excluded.primary_type,
                   resource_type = excluded.resource_type,
                   last_modified = excluded.last_modified",
                params![
                    row.node.path.as_str(),
                    row.parent_path.as_str(),
                    row.node.name.as_str(),
                    ordinal,
                    row.node.primary_type.as_str(),
                    row.node.resource_type.as_deref(),
                    row.node.last_modified.map(format_date),
                ],
            )
            .await
            .map_err(NodeCounterError::repository)?;

            for (key, value) in &row.properties {
                upsert_property(&tx, &row.node.path, key, value).await?;
            }
        }

        tx.commit().await.map_err(NodeCounterError::repository)?;
        tracing::info!(parent, nodes = rows.len(), "imported content tree");
        Ok(rows.len())
    }

    /// Recompute approximate descendant counts for every page content node.
    /// Enables the estimator once at least one row exists.
    pub async fn refresh_statistics(&self, page_type: &str, content_node: &str) -> Result<usize> {
        let conn = self.connect()?;
        let content_paths = {
            let mut rows = conn
                .query(
                    "SELECT c.path FROM nodes c JOIN nodes p ON c.parent_path = p.path
                     WHERE c.name = ?1 AND (p.primary_type = ?2 OR p.resource_type = ?2)",
                    params![content_node, page_type],
                )
                .await
                .map_err(NodeCounterError::repository)?;

            let mut paths = Vec::new();
            while let Some(row) = rows.next().await.map_err(NodeCounterError::repository)? {
                paths.push(row.get::<String>(0).map_err(NodeCounterError::repository)?);
            }
            paths
        };

        let now = format_date(Utc::now());
        for path in &content_paths {
            let count = descendant_paths(&conn, path, page_type, None).await?.len();
            conn.execute(
                "INSERT INTO node_stats (path, descendant_count, computed_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(path) DO UPDATE SET
                   descendant_count = excluded.descendant_count,
                   computed_at = excluded.computed_at",
                params![path.as_str(), count as i64, now.as_str()],
            )
            .await
            .map_err(NodeCounterError::repository)?;
        }

        self.statistics
            .store(!content_paths.is_empty(), Ordering::Relaxed);
        tracing::info!(pages = content_paths.len(), "refreshed node statistics");
        Ok(content_paths.len())
    }
}

#[async_trait]
impl Repository for SqlRepository {
    async fn open_session(&self) -> Result<Box<dyn Session>> {
        let conn = self.connect()?;
        Ok(Box::new(SqlSession {
            conn,
            pending: Vec::new(),
        }))
    }

    fn estimator(&self) -> Option<Arc<dyn Estimator>> {
        if self.statistics.load(Ordering::Relaxed) {
            Some(Arc::new(SqlEstimator {
                db: Arc::clone(&self.db),
            }))
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A libSQL connection plus the writes it has not committed yet.
pub struct SqlSession {
    conn: Connection,
    pending: Vec<PendingWrite>,
}

#[async_trait]
impl Session for SqlSession {
    async fn resolve(&self, path: &str) -> Result<Option<Node>> {
        fetch_node(&self.conn, path).await
    }

    async fn children(&self, path: &str) -> Result<Vec<Node>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes WHERE parent_path = ?1 ORDER BY ordinal, path"
                ),
                params![path],
            )
            .await
            .map_err(NodeCounterError::repository)?;

        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await.map_err(NodeCounterError::repository)? {
            nodes.push(row_to_node(&row)?);
        }
        Ok(nodes)
    }

    async fn query(&self, query: &StructuralQuery) -> Result<Vec<String>> {
        match query {
            StructuralQuery::Pages {
                root,
                page_type,
                modified_since,
            } => {
                let prefix = if root == "/" {
                    "/".to_string()
                } else {
                    format!("{}/", root.trim_end_matches('/'))
                };
                let mut rows = match modified_since {
                    Some(filter) => self
                        .conn
                        .query(
                            MODIFIED_PAGES_SQL,
                            params![
                                prefix.as_str(),
                                root.as_str(),
                                page_type.as_str(),
                                filter.content_node.as_str(),
                                format_date(filter.cutoff),
                            ],
                        )
                        .await,
                    None => {
                        self.conn
                            .query(
                                PAGES_SQL,
                                params![prefix.as_str(), root.as_str(), page_type.as_str()],
                            )
                            .await
                    }
                }
                .map_err(|e| NodeCounterError::Query(e.to_string()))?;

                let mut paths = Vec::new();
                while let Some(row) = rows
                    .next()
                    .await
                    .map_err(|e| NodeCounterError::Query(e.to_string()))?
                {
                    paths.push(
                        row.get::<String>(0)
                            .map_err(|e| NodeCounterError::Query(e.to_string()))?,
                    );
                }
                Ok(paths)
            }
            StructuralQuery::Descendants {
                root,
                exclude_type,
                limit,
            } => descendant_paths(&self.conn, root, exclude_type, Some(*limit)).await,
        }
    }

    async fn read_property(&self, path: &str, key: &str) -> Result<Option<PropertyValue>> {
        if let Some(value) = pending_value(&self.pending, path, key) {
            return Ok(Some(value.clone()));
        }

        let mut rows = self
            .conn
            .query(
                "SELECT value_json FROM properties WHERE node_path = ?1 AND key = ?2",
                params![path, key],
            )
            .await
            .map_err(NodeCounterError::repository)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let json: String = row.get(0).map_err(NodeCounterError::repository)?;
                let value = serde_json::from_str(&json).map_err(|e| {
                    NodeCounterError::validation(format!("malformed property {key} on {path}: {e}"))
                })?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(NodeCounterError::repository(e)),
        }
    }

    async fn write_property(&mut self, path: &str, key: &str, value: PropertyValue) -> Result<()> {
        if fetch_node(&self.conn, path).await?.is_none() {
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

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(NodeCounterError::repository)?;
        for write in &self.pending {
            upsert_property(&tx, &write.path, &write.key, &write.value).await?;
        }
        tx.commit().await.map_err(NodeCounterError::repository)?;

        tracing::trace!(writes = self.pending.len(), "session committed");
        self.pending.clear();
        Ok(())
    }

    fn reset_pending(&mut self) {
        self.pending.clear();
    }

    fn pending_writes(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

/// Reads precomputed descendant counts from `node_stats`.
struct SqlEstimator {
    db: Arc<Database>,
}

#[async_trait]
impl Estimator for SqlEstimator {
    async fn estimate(&self, path: &str) -> Result<Estimate> {
        let conn = connect(&self.db)?;
        let mut rows = conn
            .query(
                "SELECT descendant_count FROM node_stats WHERE path = ?1",
                params![path],
            )
            .await
            .map_err(NodeCounterError::repository)?;

        match rows.next().await.map_err(NodeCounterError::repository)? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(NodeCounterError::repository)?;
                Ok(Estimate::Count(count.max(0) as u64))
            }
            None => Ok(Estimate::Unavailable),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Open a connection that waits [`BUSY_TIMEOUT`] on a locked database.
fn connect(db: &Database) -> Result<Connection> {
    let conn = db.connect().map_err(|e| NodeCounterError::Session(e.to_string()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| NodeCounterError::Session(e.to_string()))?;
    Ok(conn)
}

/// Run pending schema migrations.
async fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn).await;

    for migration in migrations::all_migrations() {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                NodeCounterError::Repository(format!(
                    "migration v{} failed: {e}",
                    migration.version
                ))
            })?;
        }
    }
    Ok(())
}

/// Get the current schema version, or 0 if no migrations have been applied.
async fn get_schema_version(conn: &Connection) -> u32 {
    let result = conn
        .query("SELECT MAX(version) FROM schema_migrations", params![])
        .await;

    match result {
        Ok(mut rows) => {
            if let Ok(Some(row)) = rows.next().await {
                row.get::<u32>(0).unwrap_or(0)
            } else {
                0
            }
        }
        Err(_) => 0, // Table doesn't exist yet
    }
}

async fn count_rows(conn: &Connection, sql: &str) -> Result<i64> {
    let mut rows = conn
        .query(sql, params![])
        .await
        .map_err(NodeCounterError::repository)?;
    match rows.next().await.map_err(NodeCounterError::repository)? {
        Some(row) => row.get::<i64>(0).map_err(NodeCounterError::repository),
        None => Ok(0),
    }
}

async fn count_rows_with(conn: &Connection, sql: &str, arg: &str) -> Result<i64> {
    let mut rows = conn
        .query(sql, params![arg])
        .await
        .map_err(NodeCounterError::repository)?;
    match rows.next().await.map_err(NodeCounterError::repository)? {
        Some(row) => row.get::<i64>(0).map_err(NodeCounterError::repository),
        None => Ok(0),
    }
}

async fn fetch_node(conn: &Connection, path: &str) -> Result<Option<Node>> {
    let mut rows = conn
        .query(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE path = ?1"),
            params![path],
        )
        .await
        .map_err(NodeCounterError::repository)?;

    match rows.next().await {
        Ok(Some(row)) => Ok(Some(row_to_node(&row)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(NodeCounterError::repository(e)),
    }
}

async fn descendant_paths(
    conn: &Connection,
    root: &str,
    exclude_type: &str,
    limit: Option<usize>,
) -> Result<Vec<String>> {
    // SQLite treats a negative LIMIT as unbounded.
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut rows = conn
        .query(DESCENDANTS_SQL, params![root, exclude_type, limit])
        .await
        .map_err(|e| NodeCounterError::Query(e.to_string()))?;

    let mut paths = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| NodeCounterError::Query(e.to_string()))?
    {
        paths.push(
            row.get::<String>(0)
                .map_err(|e| NodeCounterError::Query(e.to_string()))?,
        );
    }
    Ok(paths)
}

async fn upsert_property(
    conn: &Connection,
    path: &str,
    key: &str,
    value: &PropertyValue,
) -> Result<()> {
    let json = serde_json::to_string(value)
        .map_err(|e| NodeCounterError::validation(format!("unserializable property {key}: {e}")))?;
    conn.execute(
        "INSERT INTO properties (node_path, key, value_json) VALUES (?1, ?2, ?3)
         ON CONFLICT(node_path, key) DO UPDATE SET value_json = excluded.value_json",
        params![path, key, json.as_str()],
    )
    .await
    .map_err(NodeCounterError::repository)?;
    Ok(())
}

/// Fixed-width UTC format so stored dates compare correctly as text.
fn format_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Convert a database row to a [`Node`].
fn row_to_node(row: &libsql::Row) -> Result<Node> {
    Ok(Node {
        path: row.get::<String>(0).map_err(NodeCounterError::repository)?,
        name: row.get::<String>(1).map_err(NodeCounterError::repository)?,
        primary_type: row.get::<String>(2).map_err(NodeCounterError::repository)?,
        resource_type: row.get::<String>(3).ok(),
        last_modified: row
            .get::<String>(4)
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModifiedSince;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    /// Create a temp file repository for testing.
    async fn test_repo() -> SqlRepository {
        let tmp = std::env::temp_dir().join(format!("nc_test_{}.db", Uuid::now_v7()));
        SqlRepository::open(&tmp).await.expect("open test db")
    }

    fn page(name: &str, content_children: usize) -> TreeNode {
        let content = TreeNode::new("jcr:content", "cq:PageContent").with_children(
            (0..content_children).map(|i| TreeNode::new(format!("c{i}"), "nt:unstructured")),
        );
        TreeNode::new(name, "cq:Page").with_child(content)
    }

    fn site() -> TreeNode {
        // /content/site/{a,b}; b nested inside a's content
        let a_content = TreeNode::new("jcr:content", "cq:PageContent").with_children([
            TreeNode::new("par", "nt:unstructured")
                .with_child(TreeNode::new("text", "nt:unstructured"))
                .with_child(page("b", 2)),
            TreeNode::new("image", "nt:unstructured"),
        ]);
        TreeNode::new("content", "sling:Folder").with_child(
            TreeNode::new("site", "sling:Folder")
                .with_child(TreeNode::new("a", "cq:Page").with_child(a_content))
                .with_child(page("c", 0)),
        )
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let repo = test_repo().await;
        let conn = repo.connect().unwrap();
        assert_eq!(get_schema_version(&conn).await, 2);
        let session = repo.open_session().await.unwrap();
        let root = session.resolve("/").await.unwrap().expect("root node");
        assert_eq!(root.primary_type, crate::ROOT_NODE_TYPE);
        assert!(repo.estimator().is_none());
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("nc_test_{}.db", Uuid::now_v7()));
        let first = SqlRepository::open(&tmp).await.expect("first open");
        drop(first);
        let second = SqlRepository::open(&tmp).await.expect("second open");
        let conn = second.connect().unwrap();
        assert_eq!(get_schema_version(&conn).await, 2);
    }

    #[tokio::test]
    async fn import_and_browse() {
        let repo = test_repo().await;
        let written = repo.import_tree("/", &site()).await.unwrap();
        assert_eq!(written, site().size());

        let session = repo.open_session().await.unwrap();
        let children = session.children("/content/site").await.unwrap();
        let names: Vec<_> = children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(children[0].is_page("cq:Page"));
    }

    #[tokio::test]
    async fn import_requires_parent() {
        let repo = test_repo().await;
        let err = repo
            .import_tree("/missing", &TreeNode::new("x", "nt:unstructured"))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeCounterError::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn pages_query_finds_nested_pages() {
        let repo = test_repo().await;
        repo.import_tree("/", &site()).await.unwrap();
        let session = repo.open_session().await.unwrap();

        let mut pages = session
            .query(&StructuralQuery::Pages {
                root: "/content/site".into(),
                page_type: "cq:Page".into(),
                modified_since: None,
            })
            .await
            .unwrap();
        pages.sort();
        assert_eq!(
            pages,
            vec![
                "/content/site/a",
                "/content/site/a/jcr:content/par/b",
                "/content/site/c",
            ]
        );
    }

    #[tokio::test]
    async fn descendants_query_excludes_page_subtrees() {
        let repo = test_repo().await;
        repo.import_tree("/", &site()).await.unwrap();
        let session = repo.open_session().await.unwrap();

        let query = StructuralQuery::Descendants {
            root: "/content/site/a/jcr:content".into(),
            exclude_type: "cq:Page".into(),
            limit: 10_000,
        };
        let paths = session.query(&query).await.unwrap();
        // par, par/text, image; b and its content are excluded
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| !p.contains("/b")));

        let capped = session
            .query(&StructuralQuery::Descendants {
                root: "/content/site/a/jcr:content".into(),
                exclude_type: "cq:Page".into(),
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn modified_since_filters_on_content_node() {
        let repo = test_repo().await;
        let now = Utc::now();
        let fresh = TreeNode::new("fresh", "cq:Page")
            .with_child(TreeNode::new("jcr:content", "cq:PageContent").modified_at(now));
        let stale = TreeNode::new("stale", "cq:Page").with_child(
            TreeNode::new("jcr:content", "cq:PageContent").modified_at(now - ChronoDuration::days(3)),
        );
        repo.import_tree(
            "/",
            &TreeNode::new("content", "sling:Folder").with_children([fresh, stale]),
        )
        .await
        .unwrap();

        let session = repo.open_session().await.unwrap();
        let pages = session
            .query(&StructuralQuery::Pages {
                root: "/content".into(),
                page_type: "cq:Page".into(),
                modified_since: Some(ModifiedSince {
                    content_node: "jcr:content".into(),
                    cutoff: now - ChronoDuration::hours(24),
                }),
            })
            .await
            .unwrap();
        assert_eq!(pages, vec!["/content/fresh"]);
    }

    #[tokio::test]
    async fn writes_are_buffered_until_commit() {
        let repo = test_repo().await;
        repo.import_tree("/", &page("p", 1)).await.unwrap();

        let mut writer = repo.open_session().await.unwrap();
        let reader = repo.open_session().await.unwrap();

        writer
            .write_property("/p/jcr:content", "nodeCount", PropertyValue::Long(7))
            .await
            .unwrap();
        assert_eq!(writer.pending_writes(), 1);
        assert_eq!(
            writer.read_property("/p/jcr:content", "nodeCount").await.unwrap(),
            Some(PropertyValue::Long(7))
        );
        assert_eq!(
            reader.read_property("/p/jcr:content", "nodeCount").await.unwrap(),
            None
        );

        writer.commit().await.unwrap();
        assert_eq!(writer.pending_writes(), 0);
        assert_eq!(
            reader.read_property("/p/jcr:content", "nodeCount").await.unwrap(),
            Some(PropertyValue::Long(7))
        );
    }

    #[tokio::test]
    async fn reset_discards_pending_writes() {
        let repo = test_repo().await;
        repo.import_tree("/", &page("p", 0)).await.unwrap();

        let mut session = repo.open_session().await.unwrap();
        session
            .write_property("/p/jcr:content", "complexity", PropertyValue::String("low".into()))
            .await
            .unwrap();
        session.reset_pending();
        session.commit().await.unwrap();

        let fresh = repo.open_session().await.unwrap();
        assert_eq!(
            fresh.read_property("/p/jcr:content", "complexity").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn write_to_missing_node_fails() {
        let repo = test_repo().await;
        let mut session = repo.open_session().await.unwrap();
        let err = session
            .write_property("/nope", "nodeCount", PropertyValue::Long(1))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeCounterError::NodeNotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn estimator_waits_out_a_concurrent_commit() {
        let repo = test_repo().await;
        repo.import_tree("/", &site()).await.unwrap();
        repo.refresh_statistics("cq:Page", "jcr:content").await.unwrap();
        let estimator = repo.estimator().expect("estimator after refresh");

        let writer = repo.connect().unwrap();
        writer.execute("BEGIN EXCLUSIVE", params![]).await.unwrap();
        writer
            .execute(
                "UPDATE node_stats SET descendant_count = 9 WHERE path = ?1",
                params!["/content/site/a/jcr:content"],
            )
            .await
            .unwrap();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            writer.execute("COMMIT", params![]).await.unwrap();
        });

        let estimate = estimator.estimate("/content/site/a/jcr:content").await;
        release.await.unwrap();
        assert!(matches!(estimate, Ok(Estimate::Count(_))), "{estimate:?}");
    }

    #[tokio::test]
    async fn statistics_enable_estimator() {
        let repo = test_repo().await;
        repo.import_tree("/", &site()).await.unwrap();
        assert!(repo.estimator().is_none());

        let refreshed = repo.refresh_statistics("cq:Page", "jcr:content").await.unwrap();
        assert_eq!(refreshed, 3);

        let estimator = repo.estimator().expect("estimator after refresh");
        assert_eq!(
            estimator.estimate("/content/site/a/jcr:content").await.unwrap(),
            Estimate::Count(3)
        );
        assert_eq!(
            estimator.estimate("/content/site/unknown").await.unwrap(),
            Estimate::Unavailable
        );
    }
}
