//! Dossier Common Library
//!
//! Shared code for the Dossier services including:
//! - Database models and the store abstraction
//! - Job lifecycle and status rollup
//! - Analyzer client abstraction
//! - Blob storage access
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod analyzer;
pub mod config;
pub mod db;
pub mod errors;
pub mod jobs;
pub mod metrics;
pub mod storage;
pub mod store;

// Re-export commonly used types
pub use analyzer::{AnalysisOutcome, AnalysisRequest, Analyzer, MockAnalyzer};
pub use config::AppConfig;
pub use db::DbPool;
pub use errors::{AppError, Result};
pub use jobs::JobLifecycle;
pub use storage::BlobSource;
pub use store::{JobPatch, MemStore, PgStore, Store};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default analysis model
pub const DEFAULT_ANALYZER_MODEL: &str = "dossier-analyst-1";

/// Default maximum chunk size in characters
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 30_000;
