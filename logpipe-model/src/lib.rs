//! Shared domain types for the logpipe ingestion-queue-worker-persistence pipeline.

pub mod error;
pub mod record;
pub mod queue;
pub mod cache;

pub use error::PipelineError;
pub use queue::{ConsumerStats, PendingEntry};
pub use record::{LogLevel, LogRecord};
pub use cache::CacheKey;

/// Shared `Result` alias used across every logpipe crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
