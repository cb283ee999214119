//! Read-only complexity reports and the page metadata exporter.
//!
//! Reports count live with an exact traversal and never write. The metadata
//! exporter only echoes the annotations a previous run stored.

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use nodecounter_counter::count_descendants;
use nodecounter_shared::{
    COMPLEXITY_PROPERTY, ComplexityTier, DEFAULT_CONTENT_NODE, DEFAULT_PAGE_TYPE,
    NODE_COUNT_PROPERTY, NodeCounterError, Result, TITLE_PROPERTY, Thresholds, join_path,
};
use nodecounter_storage::{Node, Session};

/// Pages listed by a subtree report unless told otherwise.
pub const DEFAULT_REPORT_LIMIT: usize = 100;

/// What counts as a page and how to bucket it.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub page_type: String,
    pub content_node: String,
    pub thresholds: Thresholds,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            page_type: DEFAULT_PAGE_TYPE.into(),
            content_node: DEFAULT_CONTENT_NODE.into(),
            thresholds: Thresholds::default(),
        }
    }
}

/// Complexity of one page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReport {
    pub success: bool,
    pub path: String,
    pub title: String,
    pub name: String,
    pub node_count: u64,
    pub complexity: ComplexityTier,
    /// Content modification time in epoch milliseconds, 0 when unknown.
    pub last_modified: i64,
    pub thresholds: Thresholds,
}

/// One row of a [`SubtreeReport`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub path: String,
    pub title: String,
    pub node_count: u64,
    pub complexity: ComplexityTier,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierSummary {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Complexity of the pages below a root, capped at a limit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtreeReport {
    pub success: bool,
    pub root_path: String,
    pub total_pages: usize,
    pub limit_reached: bool,
    pub summary: TierSummary,
    pub thresholds: Thresholds,
    pub pages: Vec<PageSummary>,
}

/// `{"success": false, "error": ...}` body for a failed report.
pub fn error_body(err: &NodeCounterError) -> Value {
    json!({ "success": false, "error": err.to_string() })
}

/// Report on a single page, counting its content live.
#[instrument(skip_all, fields(path = %page_path))]
pub async fn page_report(
    session: &dyn Session,
    page_path: &str,
    options: &ReportOptions,
) -> Result<PageReport> {
    let not_found = || NodeCounterError::NodeNotFound(format!("page not found: {page_path}"));

    let page = session
        .resolve(page_path)
        .await?
        .filter(|n| n.is_page(&options.page_type))
        .ok_or_else(not_found)?;
    let content_path = join_path(&page.path, &options.content_node);
    let content = session.resolve(&content_path).await?.ok_or_else(not_found)?;

    let node_count = count_descendants(session, &content_path, &options.page_type, None).await?;
    Ok(PageReport {
        success: true,
        title: title_of(session, &page, &content_path).await?,
        name: page.name.clone(),
        path: page.path,
        node_count,
        complexity: options.thresholds.classify(node_count),
        last_modified: content
            .last_modified
            .map(|t| t.timestamp_millis())
            .unwrap_or(0),
        thresholds: options.thresholds,
    })
}

/// Report on up to `limit` pages at or below `root`, in pre-order.
///
/// Pages without a content node are not listed.
#[instrument(skip_all, fields(root = %root, limit))]
pub async fn subtree_report(
    session: &dyn Session,
    root: &str,
    limit: usize,
    options: &ReportOptions,
) -> Result<SubtreeReport> {
    let root_node = session
        .resolve(root)
        .await?
        .ok_or_else(|| NodeCounterError::RootNotFound(root.to_string()))?;

    let mut pages = Vec::new();
    let mut summary = TierSummary::default();
    let mut stack = vec![root_node];

    while let Some(node) = stack.pop() {
        if pages.len() >= limit {
            break;
        }
        if node.is_page(&options.page_type) {
            let content_path = join_path(&node.path, &options.content_node);
            if session.resolve(&content_path).await?.is_some() {
                let node_count =
                    count_descendants(session, &content_path, &options.page_type, None).await?;
                let complexity = options.thresholds.classify(node_count);
                match complexity {
                    ComplexityTier::High => summary.high += 1,
                    ComplexityTier::Medium => summary.medium += 1,
                    ComplexityTier::Low => summary.low += 1,
                }
                pages.push(PageSummary {
                    title: title_of(session, &node, &content_path).await?,
                    path: node.path.clone(),
                    node_count,
                    complexity,
                });
            }
        }
        let children = session.children(&node.path).await?;
        stack.extend(children.into_iter().rev());
    }

    debug!(pages = pages.len(), "subtree report assembled");
    Ok(SubtreeReport {
        success: true,
        root_path: root.to_string(),
        total_pages: pages.len(),
        limit_reached: pages.len() >= limit,
        summary,
        thresholds: options.thresholds,
        pages,
    })
}

/// Stored annotations of a page, as `{"complexity": {complexity?, nodeCount?}}`.
///
/// Missing pages or content nodes yield an empty inner object.
pub async fn page_info(
    session: &dyn Session,
    page_path: &str,
    options: &ReportOptions,
) -> Result<Value> {
    let mut info = Map::new();

    match session.resolve(page_path).await? {
        Some(page) if page.is_page(&options.page_type) => {
            let content_path = join_path(&page.path, &options.content_node);
            if session.resolve(&content_path).await?.is_some() {
                if let Some(tier) = session
                    .read_property(&content_path, COMPLEXITY_PROPERTY)
                    .await?
                    .and_then(|v| v.as_str().map(str::to_string))
                {
                    info.insert("complexity".into(), Value::String(tier));
                }
                if let Some(count) = session
                    .read_property(&content_path, NODE_COUNT_PROPERTY)
                    .await?
                    .and_then(|v| v.as_long())
                {
                    info.insert("nodeCount".into(), Value::from(count));
                }
            } else {
                warn!(page = %page_path, "content node not found");
            }
        }
        _ => warn!(path = %page_path, "not a page"),
    }

    Ok(json!({ "complexity": info }))
}

/// Title from the content node's `jcr:title`, falling back to the page name.
async fn title_of(session: &dyn Session, page: &Node, content_path: &str) -> Result<String> {
    Ok(session
        .read_property(content_path, TITLE_PROPERTY)
        .await?
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| page.name.clone()))
}
