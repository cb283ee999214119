//! Core domain types: page references, complexity tiers, stored annotations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Property holding the descendant node count on a page's content node.
pub const NODE_COUNT_PROPERTY: &str = "nodeCount";

/// Property holding the complexity tier (`low` / `medium` / `high`).
pub const COMPLEXITY_PROPERTY: &str = "complexity";

/// Property holding the timestamp of the last annotation update.
pub const LAST_COUNTED_PROPERTY: &str = "lastCounted";

/// Title property read by the complexity report.
pub const TITLE_PROPERTY: &str = "jcr:title";

/// Default node type that marks a page.
pub const DEFAULT_PAGE_TYPE: &str = "cq:Page";

/// Default name of the child node holding a page's content.
pub const DEFAULT_CONTENT_NODE: &str = "jcr:content";

// ---------------------------------------------------------------------------
// PageRef
// ---------------------------------------------------------------------------

/// Addressable path of a page node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageRef(String);

impl PageRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// Path of this page's content child.
    pub fn content_path(&self, content_node: &str) -> String {
        join_path(&self.0, content_node)
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageRef {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for PageRef {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// Join a child name onto a repository path.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{}/{name}", parent.trim_end_matches('/'))
    }
}

/// Parent of a repository path, or `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" || path.is_empty() {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

// ---------------------------------------------------------------------------
// Complexity
// ---------------------------------------------------------------------------

/// Three-way complexity bucket derived from a node count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    Low,
    Medium,
    High,
}

impl ComplexityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplexityTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown complexity tier: {other}")),
        }
    }
}

/// Classification thresholds.
///
/// `high` is not required to exceed `medium`. With inverted thresholds the
/// medium band is empty and counts fall straight from `low` to `high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub high: u64,
    pub medium: u64,
}

impl Thresholds {
    pub fn new(high: u64, medium: u64) -> Self {
        Self { high, medium }
    }

    /// Bucket a node count. Pure and total.
    pub fn classify(&self, node_count: u64) -> ComplexityTier {
        if node_count > self.high {
            ComplexityTier::High
        } else if node_count > self.medium {
            ComplexityTier::Medium
        } else {
            ComplexityTier::Low
        }
    }

    /// Whether the medium tier can ever be produced.
    pub fn is_ordered(&self) -> bool {
        self.high > self.medium
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: 2048,
            medium: 1024,
        }
    }
}

/// Count plus the tier derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityResult {
    pub node_count: u64,
    pub tier: ComplexityTier,
}

impl ComplexityResult {
    pub fn classify(node_count: u64, thresholds: &Thresholds) -> Self {
        Self {
            node_count,
            tier: thresholds.classify(node_count),
        }
    }
}

// ---------------------------------------------------------------------------
// Property values
// ---------------------------------------------------------------------------

/// A typed property value stored on a repository node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    Long(i64),
    String(String),
    Date(DateTime<Utc>),
}

impl PropertyValue {
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            Self::String(s) => s.parse().ok(),
            Self::Date(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            Self::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            Self::Long(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Snapshot of one run's statistics, read once at run end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Time-sortable run identifier.
    pub run_id: Uuid,
    pub pages_discovered: u64,
    pub pages_processed: u64,
    pub pages_updated: u64,
    pub pages_skipped: u64,
    pub pages_failed: u64,
    pub total_nodes_counted: u64,
    pub batches_total: u64,
    pub batches_timed_out: u64,
    pub batches_failed: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_boundaries() {
        let t = Thresholds::new(2048, 1024);
        assert_eq!(t.classify(0), ComplexityTier::Low);
        assert_eq!(t.classify(1024), ComplexityTier::Low);
        assert_eq!(t.classify(1025), ComplexityTier::Medium);
        assert_eq!(t.classify(2048), ComplexityTier::Medium);
        assert_eq!(t.classify(2049), ComplexityTier::High);
        assert_eq!(t.classify(u64::MAX), ComplexityTier::High);
    }

    #[test]
    fn classify_is_monotonic_and_exact() {
        fn rank(t: ComplexityTier) -> u8 {
            match t {
                ComplexityTier::Low => 0,
                ComplexityTier::Medium => 1,
                ComplexityTier::High => 2,
            }
        }

        for thresholds in [Thresholds::new(2048, 1024), Thresholds::new(10, 10), Thresholds::new(3, 7)] {
            let mut prev = 0;
            for n in 0..64u64 {
                let tier = thresholds.classify(n);
                let expected = if n > thresholds.high {
                    ComplexityTier::High
                } else if n > thresholds.medium && n <= thresholds.high {
                    ComplexityTier::Medium
                } else {
                    ComplexityTier::Low
                };
                assert_eq!(tier, expected, "n={n} thresholds={thresholds:?}");
                assert!(rank(tier) >= prev);
                prev = rank(tier);
            }
        }
    }

    #[test]
    fn inverted_thresholds_never_yield_medium() {
        let t = Thresholds::new(100, 500);
        assert!(!t.is_ordered());
        assert_eq!(t.classify(300), ComplexityTier::High);
        assert_eq!(t.classify(50), ComplexityTier::Low);
        for n in 0..1000 {
            assert_ne!(t.classify(n), ComplexityTier::Medium);
        }
    }

    #[test]
    fn tier_string_roundtrip() {
        for tier in [ComplexityTier::Low, ComplexityTier::Medium, ComplexityTier::High] {
            assert_eq!(tier.as_str().parse::<ComplexityTier>().unwrap(), tier);
        }
        assert!("extreme".parse::<ComplexityTier>().is_err());
        assert_eq!(serde_json::to_string(&ComplexityTier::Medium).unwrap(), "\"medium\"");
    }

    #[test]
    fn path_helpers() {
        let page = PageRef::new("/content/site/en");
        assert_eq!(page.content_path("jcr:content"), "/content/site/en/jcr:content");
        assert_eq!(join_path("/", "content"), "/content");
        assert_eq!(parent_path("/content/site"), Some("/content"));
        assert_eq!(parent_path("/content"), Some("/"));
        assert_eq!(parent_path("/"), None);
    }

    #[test]
    fn property_value_serialization() {
        let json = serde_json::to_string(&PropertyValue::Long(42)).unwrap();
        assert_eq!(json, r#"{"type":"long","value":42}"#);
        let parsed: PropertyValue = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_long(), Some(42));
        assert_eq!(PropertyValue::String("17".into()).as_long(), Some(17));
    }
}
