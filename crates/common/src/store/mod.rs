//! Store abstraction for Dossier
//!
//! A narrow async interface over the persistent store. The job state
//! machine, processor loop, and stuck-job detector all go through this
//! trait; nothing in the core touches a database connection directly.
//!
//! Two implementations:
//! - [`PgStore`]: SeaORM over Postgres, atomic paths via raw SQL
//! - [`MemStore`]: in-memory, identical semantics, used by tests and
//!   the demo mode

mod mem;
mod pg;

pub use mem::MemStore;
pub use pg::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{
    progress_percent, AuditRecord, BackgroundJob, Document, JobDetail, JobMetadata, JobStatus,
    JobType, Project,
};
use crate::errors::{AppError, Result};

/// Partial update applied to a job through the optimistic-concurrency
/// path. Fields left `None` keep their current value.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub processed_units: Option<i32>,
    pub error_message: Option<String>,
    pub metadata: Option<JobMetadata>,
}

/// Narrow interface over the persistent store.
#[async_trait]
pub trait Store: Send + Sync {
    // Projects
    async fn insert_project(&self, name: &str) -> Result<Project>;
    async fn find_project(&self, id: Uuid) -> Result<Option<Project>>;

    /// Promote a DRAFT project to ACTIVE. Returns false when the project
    /// was not in DRAFT (promotion is not an error to repeat).
    async fn promote_project_if_draft(&self, id: Uuid) -> Result<bool>;

    /// Append an analysis fragment to the project's aggregate.
    async fn merge_project_analysis(&self, id: Uuid, fragment: serde_json::Value) -> Result<()>;

    // Documents
    async fn insert_document(
        &self,
        project_id: Uuid,
        doc_type: &str,
        size_bytes: i64,
        storage_key: &str,
    ) -> Result<Document>;
    async fn find_document(&self, id: Uuid) -> Result<Option<Document>>;
    async fn documents_for_project(&self, project_id: Uuid) -> Result<Vec<Document>>;

    /// Write a document's analysis result exactly once. Returns false
    /// when a result was already present (the write is skipped).
    async fn set_document_analysis(
        &self,
        id: Uuid,
        result: serde_json::Value,
    ) -> Result<bool>;

    // Jobs
    /// Create a PENDING job. The duplicate-active check and the insert
    /// are a single atomic step: at most one non-terminal job of a given
    /// type may exist per project.
    async fn create_job(
        &self,
        project_id: Uuid,
        job_type: JobType,
        total_units: i32,
        detail: Option<JobDetail>,
    ) -> Result<BackgroundJob>;

    async fn find_job(&self, id: Uuid) -> Result<Option<BackgroundJob>>;
    async fn jobs_for_project(&self, project_id: Uuid) -> Result<Vec<BackgroundJob>>;

    /// Atomically increment `processed_units` by `units`, clamped to
    /// `total_units`. Flips PENDING to PROCESSING on the first call and
    /// refreshes the staleness anchor. A single read-modify-write against
    /// the store: safe under arbitrary concurrent invocation.
    async fn advance_job(&self, id: Uuid, units: i32) -> Result<BackgroundJob>;

    /// Compare-and-swap update: applies `patch` only if the stored
    /// `version` still equals `expected_version`, returning
    /// `VersionConflict` otherwise.
    async fn update_job(
        &self,
        id: Uuid,
        expected_version: i32,
        patch: JobPatch,
    ) -> Result<BackgroundJob>;

    /// Atomically flip up to `limit` PENDING jobs to PROCESSING under
    /// `worker_id`. Two concurrent claimants never receive the same job.
    async fn claim_pending_jobs(&self, worker_id: &str, limit: u64)
        -> Result<Vec<BackgroundJob>>;

    /// Take over PROCESSING jobs whose staleness anchor precedes
    /// `cutoff` - claims orphaned by a stopped or crashed loop.
    async fn reclaim_abandoned_jobs(
        &self,
        worker_id: &str,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<BackgroundJob>>;

    /// Read-only: non-terminal jobs whose staleness anchor precedes
    /// `cutoff`. Safe to run at any frequency.
    async fn stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackgroundJob>>;

    // Audit
    /// Append an immutable audit record.
    async fn record_audit(
        &self,
        action: &str,
        resource_id: Uuid,
        metadata: serde_json::Value,
    ) -> Result<AuditRecord>;
}

/// Apply a patch to a job snapshot, enforcing the transition rules both
/// backends share. Pure: the caller persists the returned record under
/// its own atomicity guarantees.
pub(crate) fn apply_patch(
    job: &BackgroundJob,
    patch: &JobPatch,
    now: DateTime<Utc>,
) -> Result<BackgroundJob> {
    if job.is_terminal() {
        return Err(AppError::InvalidTransition {
            id: job.id.to_string(),
            from: job.status.clone(),
            to: patch
                .status
                .map(String::from)
                .unwrap_or_else(|| "update".to_string()),
        });
    }

    let mut next = job.clone();

    if let Some(units) = patch.processed_units {
        if units < job.processed_units {
            return Err(AppError::Validation {
                message: format!(
                    "processed_units may not decrease ({} -> {})",
                    job.processed_units, units
                ),
            });
        }
        next.processed_units = units.min(job.total_units);
        next.progress_percent = progress_percent(next.processed_units, next.total_units);
    }

    if let Some(metadata) = &patch.metadata {
        next.metadata = serde_json::to_value(metadata)?;
    }

    if let Some(status) = patch.status {
        match status {
            JobStatus::Pending => {
                return Err(AppError::InvalidTransition {
                    id: job.id.to_string(),
                    from: job.status.clone(),
                    to: String::from(status),
                });
            }
            JobStatus::Processing => {
                if next.started_at.is_none() {
                    next.started_at = Some(now.into());
                }
            }
            JobStatus::Completed => {
                next.completed_at = Some(now.into());
                next.error_message = None;
                next.claimed_by = None;
            }
            JobStatus::Failed => {
                next.failed_at = Some(now.into());
                next.error_message = patch.error_message.clone();
                next.claimed_by = None;
            }
        }
        next.status = String::from(status);
    } else if let Some(message) = &patch.error_message {
        next.error_message = Some(message.clone());
    }

    next.version = job.version + 1;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::JobMetadata;

    fn pending_job(total: i32) -> BackgroundJob {
        let now: sea_orm::prelude::DateTimeWithTimeZone = Utc::now().into();
        BackgroundJob {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            job_type: String::from(JobType::DocumentAnalysis),
            status: String::from(JobStatus::Pending),
            total_units: total,
            processed_units: 0,
            progress_percent: 0.0,
            version: 1,
            claimed_by: None,
            error_message: None,
            metadata: serde_json::to_value(JobMetadata::default()).unwrap(),
            created_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_progress_at: None,
        }
    }

    #[test]
    fn test_patch_rejects_terminal() {
        let mut job = pending_job(3);
        job.status = String::from(JobStatus::Completed);
        let err = apply_patch(&job, &JobPatch::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn test_patch_rejects_backward_status() {
        let mut job = pending_job(3);
        job.status = String::from(JobStatus::Processing);
        let patch = JobPatch {
            status: Some(JobStatus::Pending),
            ..Default::default()
        };
        let err = apply_patch(&job, &patch, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn test_patch_clamps_units_and_bumps_version() {
        let job = pending_job(4);
        let patch = JobPatch {
            processed_units: Some(9),
            ..Default::default()
        };
        let next = apply_patch(&job, &patch, Utc::now()).unwrap();
        assert_eq!(next.processed_units, 4);
        assert_eq!(next.progress_percent, 100.0);
        assert_eq!(next.version, 2);
    }

    #[test]
    fn test_patch_rejects_decreasing_units() {
        let mut job = pending_job(4);
        job.processed_units = 3;
        let patch = JobPatch {
            processed_units: Some(1),
            ..Default::default()
        };
        assert!(apply_patch(&job, &patch, Utc::now()).is_err());
    }

    #[test]
    fn test_failed_patch_stamps_reason() {
        let job = pending_job(2);
        let patch = JobPatch {
            status: Some(JobStatus::Failed),
            error_message: Some("analyzer unreachable".into()),
            ..Default::default()
        };
        let next = apply_patch(&job, &patch, Utc::now()).unwrap();
        assert_eq!(next.job_status(), JobStatus::Failed);
        assert!(next.failed_at.is_some());
        assert_eq!(next.error_message.as_deref(), Some("analyzer unreachable"));
    }
}
