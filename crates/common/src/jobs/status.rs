//! Read-side job status reporting
//!
//! Per-job views plus the project-level rollup consumed by polling
//! clients. Everything here is derived from stored rows; nothing in
//! this module mutates state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{BackgroundJob, JobStatus};
use crate::errors::Result;
use crate::store::Store;

/// One job as reported to a polling client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: Uuid,
    pub project_id: Uuid,
    pub job_type: String,
    pub status: String,
    pub total_units: i32,
    pub processed_units: i32,
    pub progress_percent: f64,
    pub error_message: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub failed_at: Option<String>,
}

impl From<&BackgroundJob> for JobStatusView {
    fn from(job: &BackgroundJob) -> Self {
        Self {
            id: job.id,
            project_id: job.project_id,
            job_type: job.job_type.clone(),
            status: job.status.clone(),
            total_units: job.total_units,
            processed_units: job.processed_units,
            progress_percent: job.progress_percent,
            error_message: job.error_message.clone(),
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            failed_at: job.failed_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Rollup of every job under one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Partial,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OverallStatus::Pending => "pending",
            OverallStatus::Processing => "processing",
            OverallStatus::Completed => "completed",
            OverallStatus::Failed => "failed",
            OverallStatus::Partial => "partial",
        };
        write!(f, "{}", s)
    }
}

/// Collapse a set of jobs into one status. Precedence, most decisive
/// first: all completed, any failed, any processing, some completed,
/// otherwise pending. An empty set reports pending.
pub fn overall_status(jobs: &[BackgroundJob]) -> OverallStatus {
    if jobs.is_empty() {
        return OverallStatus::Pending;
    }
    let completed = jobs
        .iter()
        .filter(|j| j.job_status() == JobStatus::Completed)
        .count();
    if completed == jobs.len() {
        return OverallStatus::Completed;
    }
    if jobs.iter().any(|j| j.job_status() == JobStatus::Failed) {
        return OverallStatus::Failed;
    }
    if jobs.iter().any(|j| j.job_status() == JobStatus::Processing) {
        return OverallStatus::Processing;
    }
    if completed > 0 {
        return OverallStatus::Partial;
    }
    OverallStatus::Pending
}

/// Project rollup response for status polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectJobsReport {
    pub project_id: Uuid,
    pub overall_status: OverallStatus,
    pub jobs: Vec<JobStatusView>,
}

pub async fn project_report(store: &dyn Store, project_id: Uuid) -> Result<ProjectJobsReport> {
    let jobs = store.jobs_for_project(project_id).await?;
    Ok(ProjectJobsReport {
        project_id,
        overall_status: overall_status(&jobs),
        jobs: jobs.iter().map(JobStatusView::from).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job_with_status(status: JobStatus) -> BackgroundJob {
        let now = Utc::now();
        BackgroundJob {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            job_type: "document_analysis".to_string(),
            status: String::from(status),
            total_units: 4,
            processed_units: if status == JobStatus::Completed { 4 } else { 1 },
            progress_percent: 25.0,
            version: 1,
            claimed_by: None,
            error_message: None,
            metadata: serde_json::json!({}),
            created_at: now.into(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_progress_at: None,
        }
    }

    fn jobs(statuses: &[JobStatus]) -> Vec<BackgroundJob> {
        statuses.iter().map(|s| job_with_status(*s)).collect()
    }

    #[test]
    fn test_empty_set_is_pending() {
        assert_eq!(overall_status(&[]), OverallStatus::Pending);
    }

    #[test]
    fn test_all_completed() {
        let set = jobs(&[JobStatus::Completed, JobStatus::Completed]);
        assert_eq!(overall_status(&set), OverallStatus::Completed);
    }

    #[test]
    fn test_any_failed_wins_over_processing() {
        let set = jobs(&[JobStatus::Failed, JobStatus::Processing, JobStatus::Completed]);
        assert_eq!(overall_status(&set), OverallStatus::Failed);
    }

    #[test]
    fn test_any_processing() {
        let set = jobs(&[JobStatus::Processing, JobStatus::Pending, JobStatus::Completed]);
        assert_eq!(overall_status(&set), OverallStatus::Processing);
    }

    #[test]
    fn test_mixed_completed_and_pending_is_partial() {
        let set = jobs(&[JobStatus::Completed, JobStatus::Pending]);
        assert_eq!(overall_status(&set), OverallStatus::Partial);
    }

    #[test]
    fn test_all_pending() {
        let set = jobs(&[JobStatus::Pending, JobStatus::Pending]);
        assert_eq!(overall_status(&set), OverallStatus::Pending);
    }

    #[test]
    fn test_view_serializes_timestamps_as_rfc3339() {
        let job = job_with_status(JobStatus::Processing);
        let view = JobStatusView::from(&job);
        assert_eq!(view.status, "processing");
        assert!(view.created_at.contains('T'));
        assert!(view.started_at.is_none());
    }
}
