//! # palimpsest-jobs
//!
//! Background job system for palimpsest reprocessing.
//!
//! This crate provides:
//! - Priority-based job queueing with per-document deduplication
//! - Async job processing with concurrent workers
//! - Failure classification with exponential-backoff retries
//! - The reprocessing orchestrator: annotation recovery, connection
//!   remapping, and atomic generation promotion with rollback
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use palimpsest_db::Database;
//! use palimpsest_jobs::{
//!     ReprocessHandler, ReprocessOrchestrator, WorkerBuilder, WorkerConfig,
//! };
//!
//! let db = Database::connect("postgres://...").await?;
//! let orchestrator = Arc::new(ReprocessOrchestrator::from_pool(db.pool.clone()));
//!
//! let worker = WorkerBuilder::new(Arc::new(db.jobs))
//!     .with_config(WorkerConfig::from_env())
//!     .with_handler(ReprocessHandler::new(orchestrator))
//!     .build()
//!     .await;
//!
//! let handle = worker.start();
//! // ...
//! handle.shutdown().await?;
//! ```

pub mod handler;
pub mod reprocess;
pub mod retry;
pub mod worker;

// Re-export core types
pub use palimpsest_core::*;

pub use handler::{JobContext, JobHandler, JobResult, NoOpHandler};
pub use reprocess::{PurgeSupersededHandler, ReprocessHandler, ReprocessOrchestrator};
pub use retry::{backoff_minutes, classify_error, next_retry_at};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};

/// Default maximum retries for failed jobs.
pub const DEFAULT_MAX_RETRIES: i32 = palimpsest_core::defaults::JOB_MAX_RETRIES;

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = palimpsest_core::defaults::JOB_POLL_INTERVAL_MS;
