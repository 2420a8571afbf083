//! Error types for Dossier services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - A validation/transient/invariant taxonomy for the job pipeline
//! - Structured conversions from store and client errors

use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors - rejected immediately, never retried
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Active {job_type} job already exists for project {project_id}")]
    DuplicateActiveJob {
        project_id: String,
        job_type: String,
    },

    #[error("Job {id} is incomplete: {processed} of {total} units processed")]
    IncompleteJob {
        id: String,
        processed: i32,
        total: i32,
    },

    // Resource errors
    #[error("Project not found: {id}")]
    ProjectNotFound { id: String },

    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    // Invariant violations
    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("Version conflict on job {id}: expected {expected}, found {found}")]
    VersionConflict {
        id: String,
        expected: i32,
        found: i32,
    },

    // Transient unit failures - contained by the processor loop
    #[error("Analyzer error: {message}")]
    AnalyzerError { message: String },

    #[error("Analyzer timeout after {timeout_ms}ms")]
    AnalyzerTimeout { timeout_ms: u64 },

    #[error("Blob fetch failed for {key}: {message}")]
    BlobError { key: String, message: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Transient unit failures are recorded against a unit and the job
    /// continues; everything else aborts the operation that raised it.
    pub fn is_transient_unit_failure(&self) -> bool {
        matches!(
            self,
            AppError::AnalyzerError { .. }
                | AppError::AnalyzerTimeout { .. }
                | AppError::BlobError { .. }
        )
    }

    /// Validation errors are never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. }
                | AppError::DuplicateActiveJob { .. }
                | AppError::IncompleteJob { .. }
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = AppError::AnalyzerTimeout { timeout_ms: 1000 };
        assert!(err.is_transient_unit_failure());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_validation_classification() {
        let err = AppError::DuplicateActiveJob {
            project_id: "p".into(),
            job_type: "document_analysis".into(),
        };
        assert!(err.is_validation());
        assert!(!err.is_transient_unit_failure());
    }
}
