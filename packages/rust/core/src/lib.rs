//! Core run orchestration for nodecounter.
//!
//! This crate ties discovery, counting and annotation writing into runs:
//! - [`RunCoordinator`]: one full sweep, plus worker pool lifecycle
//! - [`Orchestrator`]: batching and parallel dispatch
//! - [`Writer`]: skip-if-unchanged annotation with windowed commits
//! - [`Scheduler`]: fixed-interval single-flight trigger
//! - [`report`]: read-only complexity reports and metadata export

pub mod coordinator;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod report;
pub mod scheduler;
pub mod stats;
pub mod writer;

#[cfg(test)]
mod fixtures;

pub use coordinator::RunCoordinator;
pub use orchestrator::{BatchOutcome, Orchestrator, PageOutcome, batch_size, partition, truncate};
pub use pool::WorkerPool;
pub use progress::{RunProgress, SilentProgress};
pub use scheduler::{ConfigLoader, ScheduleSummary, Scheduler};
pub use stats::RunStats;
pub use writer::{Flush, FlushError, Outcome, Writer};
