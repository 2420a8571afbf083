//! Processor service error types

use thiserror::Error;

/// Service lifecycle errors. Job and unit failures are reported through
/// `dossier_common::AppError` and the job records themselves.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("Service already running")]
    AlreadyRunning,

    #[error("Service not running")]
    NotRunning,
}
