//! Application configuration for nodecounter.
//!
//! User config lives at `~/.nodecounter/nodecounter.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NodeCounterError, Result};
use crate::types::{DEFAULT_CONTENT_NODE, DEFAULT_PAGE_TYPE, Thresholds};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "nodecounter.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".nodecounter";

/// Default repository database file name inside the config directory.
const DEFAULT_DATABASE_NAME: &str = "repository.db";

// ---------------------------------------------------------------------------
// Config structs (matching nodecounter.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Job trigger settings.
    #[serde(default)]
    pub job: JobConfig,

    /// Complexity thresholds.
    #[serde(default)]
    pub thresholds: ThresholdsConfig,

    /// Worker pool and batching.
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Incremental (modified-since) discovery.
    #[serde(default)]
    pub incremental: IncrementalConfig,

    /// Repository location and node naming.
    #[serde(default)]
    pub repository: RepositoryConfig,
}

/// `[job]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Whether the scheduled job runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Root path under which pages are processed.
    #[serde(default = "default_root_path")]
    pub root_path: String,

    /// Seconds between scheduled runs.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root_path: default_root_path(),
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_root_path() -> String {
    "/content".into()
}
fn default_interval_secs() -> u64 {
    86_400
}

/// `[thresholds]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    /// Pages with more nodes than this are `high`.
    #[serde(default = "default_high_threshold")]
    pub high: u64,

    /// Pages with more nodes than this (up to `high`) are `medium`.
    #[serde(default = "default_medium_threshold")]
    pub medium: u64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            high: default_high_threshold(),
            medium: default_medium_threshold(),
        }
    }
}

fn default_high_threshold() -> u64 {
    2048
}
fn default_medium_threshold() -> u64 {
    1024
}

/// `[performance]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Number of parallel batch workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Maximum pages processed per run (0 = unlimited).
    #[serde(default = "default_max_pages_per_run")]
    pub max_pages_per_run: usize,

    /// Page updates buffered before each commit.
    #[serde(default = "default_batch_commit_size")]
    pub batch_commit_size: usize,

    /// Deadline for a single batch, in seconds.
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    /// Safety cap on the bounded descendant query.
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,

    /// Stop exact traversal once a page is known to be `high`.
    #[serde(default)]
    pub traversal_early_stop: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_pages_per_run: default_max_pages_per_run(),
            batch_commit_size: default_batch_commit_size(),
            batch_timeout_secs: default_batch_timeout_secs(),
            query_limit: default_query_limit(),
            traversal_early_stop: false,
        }
    }
}

fn default_worker_count() -> usize {
    4
}
fn default_max_pages_per_run() -> usize {
    5000
}
fn default_batch_commit_size() -> usize {
    50
}
fn default_batch_timeout_secs() -> u64 {
    30 * 60
}
fn default_query_limit() -> usize {
    10_000
}

/// `[incremental]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalConfig {
    /// Only process pages whose content changed within the lookback window.
    #[serde(default)]
    pub enabled: bool,

    /// Lookback window in hours.
    #[serde(default = "default_modified_since_hours")]
    pub modified_since_hours: u64,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            modified_since_hours: default_modified_since_hours(),
        }
    }
}

fn default_modified_since_hours() -> u64 {
    24
}

/// `[repository]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Path to the repository database. Empty means `~/.nodecounter/repository.db`.
    #[serde(default)]
    pub database: String,

    /// Node type marking a page.
    #[serde(default = "default_page_type")]
    pub page_type: String,

    /// Name of the child node holding page content and annotations.
    #[serde(default = "default_content_node")]
    pub content_node: String,

    /// Page path glob patterns excluded from processing.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            database: String::new(),
            page_type: default_page_type(),
            content_node: default_content_node(),
            exclude_patterns: Vec::new(),
        }
    }
}

fn default_page_type() -> String {
    DEFAULT_PAGE_TYPE.into()
}
fn default_content_node() -> String {
    DEFAULT_CONTENT_NODE.into()
}

// ---------------------------------------------------------------------------
// Run config (immutable snapshot for one run)
// ---------------------------------------------------------------------------

/// Immutable configuration for a single run. Reconfiguration builds a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub root_path: String,
    pub thresholds: Thresholds,
    pub worker_count: usize,
    /// 0 = unlimited.
    pub max_pages_per_run: usize,
    pub batch_commit_size: usize,
    /// `Some(window)` enables incremental discovery.
    pub only_modified_since: Option<Duration>,
    pub batch_timeout: Duration,
    pub page_type: String,
    pub content_node: String,
    pub exclude_patterns: Vec<String>,
    pub query_limit: usize,
    pub traversal_early_stop: bool,
}

impl RunConfig {
    /// Config with defaults for everything but the root path.
    pub fn new(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            thresholds: Thresholds::default(),
            worker_count: default_worker_count(),
            max_pages_per_run: default_max_pages_per_run(),
            batch_commit_size: default_batch_commit_size(),
            only_modified_since: None,
            batch_timeout: Duration::from_secs(default_batch_timeout_secs()),
            page_type: default_page_type(),
            content_node: default_content_node(),
            exclude_patterns: Vec::new(),
            query_limit: default_query_limit(),
            traversal_early_stop: false,
        }
    }

    /// Reject values the engine cannot run with.
    ///
    /// Threshold ordering is deliberately not enforced: inverted thresholds
    /// keep their literal meaning and only produce a warning.
    pub fn validate(&self) -> Result<()> {
        if !self.root_path.starts_with('/') {
            return Err(NodeCounterError::config(format!(
                "root_path must be absolute, got '{}'",
                self.root_path
            )));
        }
        if self.worker_count == 0 {
            return Err(NodeCounterError::config("worker_count must be at least 1"));
        }
        if self.batch_commit_size == 0 {
            return Err(NodeCounterError::config(
                "batch_commit_size must be at least 1",
            ));
        }
        if self.query_limit == 0 {
            return Err(NodeCounterError::config("query_limit must be at least 1"));
        }
        if self.batch_timeout.is_zero() {
            return Err(NodeCounterError::config(
                "batch_timeout_secs must be at least 1",
            ));
        }
        if self.page_type.is_empty() || self.content_node.is_empty() {
            return Err(NodeCounterError::config(
                "page_type and content_node must not be empty",
            ));
        }
        if !self.thresholds.is_ordered() {
            tracing::warn!(
                high = self.thresholds.high,
                medium = self.thresholds.medium,
                "high threshold does not exceed medium threshold; medium tier is unreachable"
            );
        }
        Ok(())
    }
}

impl TryFrom<&AppConfig> for RunConfig {
    type Error = NodeCounterError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let only_modified_since = config.incremental.enabled.then(|| {
            Duration::from_secs(config.incremental.modified_since_hours.saturating_mul(3600))
        });

        let run = Self {
            root_path: config.job.root_path.clone(),
            thresholds: Thresholds::new(config.thresholds.high, config.thresholds.medium),
            worker_count: config.performance.worker_count,
            max_pages_per_run: config.performance.max_pages_per_run,
            batch_commit_size: config.performance.batch_commit_size,
            only_modified_since,
            batch_timeout: Duration::from_secs(config.performance.batch_timeout_secs),
            page_type: config.repository.page_type.clone(),
            content_node: config.repository.content_node.clone(),
            exclude_patterns: config.repository.exclude_patterns.clone(),
            query_limit: config.performance.query_limit,
            traversal_early_stop: config.performance.traversal_early_stop,
        };
        run.validate()?;
        Ok(run)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.nodecounter/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| NodeCounterError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.nodecounter/nodecounter.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the repository database path, expanding a leading `~/`.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    let raw = config.repository.database.trim();
    if raw.is_empty() {
        return Ok(config_dir()?.join(DEFAULT_DATABASE_NAME));
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| NodeCounterError::config("could not determine home directory"))?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(raw))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NodeCounterError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        NodeCounterError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| NodeCounterError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| NodeCounterError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NodeCounterError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
