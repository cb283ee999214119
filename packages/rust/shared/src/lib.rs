//! Shared types, error model, and configuration for nodecounter.
//!
//! This crate is the foundation depended on by all other nodecounter crates.
//! It provides:
//! - [`NodeCounterError`]: the unified error type
//! - Domain types ([`PageRef`], [`ComplexityTier`], [`Thresholds`], [`RunReport`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, IncrementalConfig, JobConfig, PerformanceConfig, RepositoryConfig, RunConfig,
    ThresholdsConfig, config_dir, config_file_path, database_path, init_config, load_config,
    load_config_from,
};
pub use error::{NodeCounterError, Result};
pub use types::{
    COMPLEXITY_PROPERTY, ComplexityResult, ComplexityTier, DEFAULT_CONTENT_NODE,
    DEFAULT_PAGE_TYPE, LAST_COUNTED_PROPERTY, NODE_COUNT_PROPERTY, PageRef, PropertyValue,
    RunReport, TITLE_PROPERTY, Thresholds, join_path, parent_path,
};
