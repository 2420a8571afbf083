//! Stuck-job detector
//!
//! Periodic sweep over non-terminal jobs whose staleness anchor has not
//! moved within the threshold. Detection is read-only; resolution
//! auto-fails stalled jobs so projects cannot hang forever on a dead
//! worker. A manual force-complete path exists for operators who need a
//! project unblocked regardless.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dossier_common::config::DetectorConfig;
use dossier_common::db::models::{BackgroundJob, JobStatus};
use dossier_common::errors::Result;
use dossier_common::metrics::METRICS_PREFIX;
use dossier_common::store::Store;
use dossier_common::JobLifecycle;
use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Reason recorded on jobs the detector fails.
pub const STALLED_REASON: &str = "stalled: no progress within threshold";

/// A project with stalled work, as reported to operators.
#[derive(Debug, Clone)]
pub struct StuckProject {
    pub project_id: Uuid,
    pub stalled_jobs: Vec<BackgroundJob>,
}

pub struct StuckJobDetector {
    store: Arc<dyn Store>,
    lifecycle: JobLifecycle,
    config: DetectorConfig,
}

impl StuckJobDetector {
    pub fn new(store: Arc<dyn Store>, config: DetectorConfig) -> Self {
        let lifecycle = JobLifecycle::new(store.clone());
        Self {
            store,
            lifecycle,
            config,
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::seconds(self.config.stale_after_secs as i64)
    }

    /// Read-only: non-terminal jobs with no progress since the cutoff.
    pub async fn detect(&self, now: DateTime<Utc>) -> Result<Vec<BackgroundJob>> {
        self.store.stale_jobs(self.cutoff(now)).await
    }

    /// Fail every stalled job. Returns the jobs that were transitioned;
    /// a job that moved under our feet is skipped, not an error.
    #[instrument(skip(self, now))]
    pub async fn resolve_stalled(&self, now: DateTime<Utc>) -> Result<Vec<BackgroundJob>> {
        let stale = self.detect(now).await?;
        gauge!(format!("{}_jobs_stale_detected", METRICS_PREFIX)).set(stale.len() as f64);

        let mut resolved = Vec::new();
        for job in stale {
            match self.lifecycle.fail(job.id, STALLED_REASON).await {
                Ok(failed) => {
                    warn!(
                        job_id = %job.id,
                        project_id = %job.project_id,
                        processed = job.processed_units,
                        total = job.total_units,
                        "Stalled job auto-failed"
                    );
                    counter!(format!("{}_jobs_stalled_total", METRICS_PREFIX)).increment(1);
                    self.audit("job.auto_fail", &failed).await;
                    resolved.push(failed);
                }
                Err(e) => {
                    // Raced with a live worker finishing it, most likely
                    info!(job_id = %job.id, error = %e, "Stalled job not failed, skipping");
                }
            }
        }
        Ok(resolved)
    }

    /// Stalled PROCESSING jobs grouped by project, ordered by project
    /// id. Stale PENDING jobs are the auto-fail sweep's concern and do
    /// not mark a project stuck.
    pub async fn stuck_projects(&self, now: DateTime<Utc>) -> Result<Vec<StuckProject>> {
        let stale = self.detect(now).await?;
        let mut by_project: BTreeMap<Uuid, Vec<BackgroundJob>> = BTreeMap::new();
        for job in stale {
            if job.job_status() != JobStatus::Processing {
                continue;
            }
            by_project.entry(job.project_id).or_default().push(job);
        }
        Ok(by_project
            .into_iter()
            .map(|(project_id, stalled_jobs)| StuckProject {
                project_id,
                stalled_jobs,
            })
            .collect())
    }

    /// Operator override: force-complete every non-terminal job of the
    /// project and promote it out of draft. Each forced job leaves an
    /// audit record.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn force_complete_project(&self, project_id: Uuid) -> Result<Vec<BackgroundJob>> {
        let jobs = self.store.jobs_for_project(project_id).await?;
        let mut forced = Vec::new();

        for job in jobs.into_iter().filter(|j| !j.is_terminal()) {
            let completed = self.lifecycle.force_complete(job.id).await?;
            info!(job_id = %completed.id, "Job force-completed");
            self.audit("job.force_complete", &completed).await;
            forced.push(completed);
        }

        if self.store.promote_project_if_draft(project_id).await? {
            info!("Project promoted to active");
            if let Err(e) = self
                .store
                .record_audit(
                    "project.promote",
                    project_id,
                    serde_json::json!({ "trigger": "force_complete" }),
                )
                .await
            {
                warn!(error = %e, "Audit write failed");
            }
        }
        Ok(forced)
    }

    /// Periodic sweep until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.sweep_interval_secs);
        info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            stale_after_secs = self.config.stale_after_secs,
            "Stuck-job detector started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if let Err(e) = self.resolve_stalled(Utc::now()).await {
                error!(error = %e, "Detector sweep failed");
            }
        }
        info!("Stuck-job detector stopped");
    }

    async fn audit(&self, action: &str, job: &BackgroundJob) {
        let metadata = serde_json::json!({
            "project_id": job.project_id,
            "job_type": job.job_type,
            "status": job.status,
            "processed_units": job.processed_units,
            "total_units": job.total_units,
        });
        if let Err(e) = self.store.record_audit(action, job.id, metadata).await {
            warn!(job_id = %job.id, error = %e, "Audit write failed");
        }
    }
}
