//! Job lifecycle operations
//!
//! The single mutation path for job records. Every component - the
//! processor loop, the stuck-job detector, external control actions -
//! changes a job only through these operations; direct field writes do
//! not exist outside the store implementations.

pub mod status;

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::models::{BackgroundJob, JobDetail, JobStatus, JobType};
use crate::errors::{AppError, Result};
use crate::store::{JobPatch, Store};

/// Attempts at a compare-and-swap before giving up on a contended job.
const CAS_RETRIES: u32 = 5;

/// Lifecycle operations over a [`Store`].
#[derive(Clone)]
pub struct JobLifecycle {
    store: Arc<dyn Store>,
}

impl JobLifecycle {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a new PENDING job for a processing stage.
    ///
    /// Rejected with `DuplicateActiveJob` when a non-terminal job of the
    /// same type already exists for the project.
    pub async fn create(
        &self,
        project_id: Uuid,
        job_type: JobType,
        total_units: i32,
        detail: Option<JobDetail>,
    ) -> Result<BackgroundJob> {
        if total_units < 0 {
            return Err(AppError::Validation {
                message: format!("total_units must be non-negative, got {}", total_units),
            });
        }
        self.store
            .find_project(project_id)
            .await?
            .ok_or_else(|| AppError::ProjectNotFound {
                id: project_id.to_string(),
            })?;

        let job = self
            .store
            .create_job(project_id, job_type, total_units, detail)
            .await?;
        info!(
            job_id = %job.id,
            project_id = %project_id,
            job_type = %job.job_type,
            total_units,
            "Job created"
        );
        Ok(job)
    }

    /// Record `units` completed units. Atomic at the store, so any
    /// number of workers may call this concurrently for one job.
    pub async fn advance(&self, job_id: Uuid, units: i32) -> Result<BackgroundJob> {
        if units <= 0 {
            return Err(AppError::Validation {
                message: format!("advance requires a positive unit count, got {}", units),
            });
        }
        self.store.advance_job(job_id, units).await
    }

    /// Transition to COMPLETED. Legal only once every unit is processed.
    pub async fn complete(&self, job_id: Uuid) -> Result<BackgroundJob> {
        self.with_cas_retry(job_id, |job| {
            if job.processed_units != job.total_units {
                return Err(AppError::IncompleteJob {
                    id: job.id.to_string(),
                    processed: job.processed_units,
                    total: job.total_units,
                });
            }
            Ok(JobPatch {
                status: Some(JobStatus::Completed),
                ..Default::default()
            })
        })
        .await
    }

    /// Transition to FAILED with a reason. Legal from PENDING or
    /// PROCESSING only.
    pub async fn fail(&self, job_id: Uuid, reason: &str) -> Result<BackgroundJob> {
        let reason = reason.to_string();
        self.with_cas_retry(job_id, move |_job| {
            Ok(JobPatch {
                status: Some(JobStatus::Failed),
                error_message: Some(reason.clone()),
                ..Default::default()
            })
        })
        .await
    }

    /// Manual emergency override: mark the job COMPLETED regardless of
    /// remaining units, stamping the forced-completion markers so the
    /// override is distinguishable from organic completion forever.
    pub async fn force_complete(&self, job_id: Uuid) -> Result<BackgroundJob> {
        self.with_cas_retry(job_id, |job| {
            let mut metadata = job.job_metadata();
            metadata.force_completed = true;
            metadata.force_completed_at = Some(Utc::now());
            Ok(JobPatch {
                status: Some(JobStatus::Completed),
                processed_units: Some(job.total_units),
                metadata: Some(metadata),
                ..Default::default()
            })
        })
        .await
    }

    /// Load-validate-swap loop. The builder sees a fresh snapshot on
    /// every attempt, so validation always runs against current state.
    async fn with_cas_retry<F>(&self, job_id: Uuid, build: F) -> Result<BackgroundJob>
    where
        F: Fn(&BackgroundJob) -> Result<JobPatch>,
    {
        let mut last_conflict = None;
        for attempt in 0..CAS_RETRIES {
            let job = self
                .store
                .find_job(job_id)
                .await?
                .ok_or_else(|| AppError::JobNotFound {
                    id: job_id.to_string(),
                })?;

            let patch = build(&job)?;
            match self.store.update_job(job_id, job.version, patch).await {
                Ok(updated) => return Ok(updated),
                Err(AppError::VersionConflict {
                    id,
                    expected,
                    found,
                }) => {
                    warn!(
                        job_id = %job_id,
                        attempt = attempt + 1,
                        expected,
                        found,
                        "Version conflict, retrying transition"
                    );
                    last_conflict = Some(AppError::VersionConflict {
                        id,
                        expected,
                        found,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict.unwrap_or_else(|| AppError::Internal {
            message: "CAS retry loop exited without a conflict".to_string(),
        }))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
