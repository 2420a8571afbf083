//! In-memory store
//!
//! Backs tests and the demo mode. All mutation happens under a single
//! write lock, which gives the same atomicity the Postgres
//! implementation gets from single-statement updates.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{
    progress_percent, AuditRecord, BackgroundJob, Document, JobDetail, JobMetadata, JobStatus,
    JobType, Project, ProjectStatus,
};
use crate::errors::{AppError, Result};

use super::{apply_patch, JobPatch, Store};

#[derive(Default)]
struct State {
    projects: HashMap<Uuid, Project>,
    documents: HashMap<Uuid, Document>,
    jobs: HashMap<Uuid, BackgroundJob>,
    audits: Vec<AuditRecord>,
}

/// In-memory [`Store`] implementation.
#[derive(Default)]
pub struct MemStore {
    state: RwLock<State>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed job record, bypassing creation-time checks.
    /// Test hook: lets detector tests backdate `created_at`.
    pub async fn insert_job_raw(&self, job: BackgroundJob) {
        self.state.write().await.jobs.insert(job.id, job);
    }

    /// Snapshot the audit trail.
    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        self.state.read().await.audits.clone()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn insert_project(&self, name: &str) -> Result<Project> {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: String::from(ProjectStatus::Draft),
            analysis_summary: None,
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.state
            .write()
            .await
            .projects
            .insert(project.id, project.clone());
        Ok(project)
    }

    async fn find_project(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(self.state.read().await.projects.get(&id).cloned())
    }

    async fn promote_project_if_draft(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let project = state
            .projects
            .get_mut(&id)
            .ok_or_else(|| AppError::ProjectNotFound { id: id.to_string() })?;
        if project.project_status() != ProjectStatus::Draft {
            return Ok(false);
        }
        project.status = String::from(ProjectStatus::Active);
        project.updated_at = Utc::now().into();
        Ok(true)
    }

    async fn merge_project_analysis(&self, id: Uuid, fragment: serde_json::Value) -> Result<()> {
        let mut state = self.state.write().await;
        let project = state
            .projects
            .get_mut(&id)
            .ok_or_else(|| AppError::ProjectNotFound { id: id.to_string() })?;
        match project.analysis_summary.as_mut() {
            Some(serde_json::Value::Array(items)) => items.push(fragment),
            _ => project.analysis_summary = Some(serde_json::Value::Array(vec![fragment])),
        }
        project.updated_at = Utc::now().into();
        Ok(())
    }

    async fn insert_document(
        &self,
        project_id: Uuid,
        doc_type: &str,
        size_bytes: i64,
        storage_key: &str,
    ) -> Result<Document> {
        let document = Document {
            id: Uuid::new_v4(),
            project_id,
            doc_type: doc_type.to_string(),
            size_bytes,
            storage_key: storage_key.to_string(),
            analysis_result: None,
            created_at: Utc::now().into(),
        };
        self.state
            .write()
            .await
            .documents
            .insert(document.id, document.clone());
        Ok(document)
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.state.read().await.documents.get(&id).cloned())
    }

    async fn documents_for_project(&self, project_id: Uuid) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        let mut docs: Vec<Document> = state
            .documents
            .values()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.created_at);
        Ok(docs)
    }

    async fn set_document_analysis(
        &self,
        id: Uuid,
        result: serde_json::Value,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let document = state
            .documents
            .get_mut(&id)
            .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })?;
        if document.analysis_result.is_some() {
            return Ok(false);
        }
        document.analysis_result = Some(result);
        Ok(true)
    }

    async fn create_job(
        &self,
        project_id: Uuid,
        job_type: JobType,
        total_units: i32,
        detail: Option<JobDetail>,
    ) -> Result<BackgroundJob> {
        let mut state = self.state.write().await;

        let duplicate = state.jobs.values().any(|j| {
            j.project_id == project_id && j.kind() == job_type && !j.is_terminal()
        });
        if duplicate {
            return Err(AppError::DuplicateActiveJob {
                project_id: project_id.to_string(),
                job_type: String::from(job_type),
            });
        }

        let now = Utc::now();
        let metadata = JobMetadata {
            detail,
            ..Default::default()
        };
        let job = BackgroundJob {
            id: Uuid::new_v4(),
            project_id,
            job_type: String::from(job_type),
            status: String::from(JobStatus::Pending),
            total_units,
            processed_units: 0,
            progress_percent: if total_units > 0 { 0.0 } else { 100.0 },
            version: 1,
            claimed_by: None,
            error_message: None,
            metadata: serde_json::to_value(metadata)?,
            created_at: now.into(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_progress_at: None,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<BackgroundJob>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn jobs_for_project(&self, project_id: Uuid) -> Result<Vec<BackgroundJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<BackgroundJob> = state
            .jobs
            .values()
            .filter(|j| j.project_id == project_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn advance_job(&self, id: Uuid, units: i32) -> Result<BackgroundJob> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })?;

        if job.is_terminal() {
            return Err(AppError::InvalidTransition {
                id: id.to_string(),
                from: job.status.clone(),
                to: "advance".to_string(),
            });
        }

        let now = Utc::now();
        job.processed_units = (job.processed_units + units).min(job.total_units);
        job.progress_percent = progress_percent(job.processed_units, job.total_units);
        if job.job_status() == JobStatus::Pending {
            job.status = String::from(JobStatus::Processing);
        }
        if job.started_at.is_none() {
            job.started_at = Some(now.into());
        }
        job.last_progress_at = Some(now.into());
        job.version += 1;
        Ok(job.clone())
    }

    async fn update_job(
        &self,
        id: Uuid,
        expected_version: i32,
        patch: JobPatch,
    ) -> Result<BackgroundJob> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })?;

        if job.version != expected_version {
            return Err(AppError::VersionConflict {
                id: id.to_string(),
                expected: expected_version,
                found: job.version,
            });
        }

        let next = apply_patch(job, &patch, Utc::now())?;
        *job = next.clone();
        Ok(next)
    }

    async fn claim_pending_jobs(
        &self,
        worker_id: &str,
        limit: u64,
    ) -> Result<Vec<BackgroundJob>> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let mut pending: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|j| j.job_status() == JobStatus::Pending)
            .map(|j| j.id)
            .collect();
        pending.sort_by_key(|id| state.jobs[id].created_at);
        pending.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(pending.len());
        for id in pending {
            let job = state.jobs.get_mut(&id).expect("listed above");
            job.status = String::from(JobStatus::Processing);
            job.claimed_by = Some(worker_id.to_string());
            if job.started_at.is_none() {
                job.started_at = Some(now.into());
            }
            job.last_progress_at = Some(now.into());
            job.version += 1;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn reclaim_abandoned_jobs(
        &self,
        worker_id: &str,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<BackgroundJob>> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let mut abandoned: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|j| {
                j.job_status() == JobStatus::Processing && j.staleness_anchor() < cutoff
            })
            .map(|j| j.id)
            .collect();
        abandoned.sort_by_key(|id| state.jobs[id].created_at);
        abandoned.truncate(limit as usize);

        let mut reclaimed = Vec::with_capacity(abandoned.len());
        for id in abandoned {
            let job = state.jobs.get_mut(&id).expect("listed above");
            job.claimed_by = Some(worker_id.to_string());
            job.last_progress_at = Some(now.into());
            job.version += 1;
            reclaimed.push(job.clone());
        }
        Ok(reclaimed)
    }

    async fn stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackgroundJob>> {
        let state = self.state.read().await;
        let mut stale: Vec<BackgroundJob> = state
            .jobs
            .values()
            .filter(|j| !j.is_terminal() && j.staleness_anchor() < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|j| j.created_at);
        Ok(stale)
    }

    async fn record_audit(
        &self,
        action: &str,
        resource_id: Uuid,
        metadata: serde_json::Value,
    ) -> Result<AuditRecord> {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            action: action.to_string(),
            resource_id,
            metadata,
            created_at: Utc::now().into(),
        };
        self.state.write().await.audits.push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_duplicate_active_job_rejected() {
        let store = MemStore::new();
        let project = store.insert_project("acme-dd").await.unwrap();

        store
            .create_job(project.id, JobType::DocumentAnalysis, 3, None)
            .await
            .unwrap();
        let err = store
            .create_job(project.id, JobType::DocumentAnalysis, 3, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateActiveJob { .. }));

        // A different type is fine
        store
            .create_job(project.id, JobType::Reanalysis, 3, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_advance_clamps_and_flips_status() {
        let store = MemStore::new();
        let project = store.insert_project("p").await.unwrap();
        let job = store
            .create_job(project.id, JobType::DocumentAnalysis, 2, None)
            .await
            .unwrap();

        let job = store.advance_job(job.id, 1).await.unwrap();
        assert_eq!(job.job_status(), JobStatus::Processing);
        assert_eq!(job.processed_units, 1);
        assert!(job.started_at.is_some());

        let job = store.advance_job(job.id, 5).await.unwrap();
        assert_eq!(job.processed_units, 2);
        assert_eq!(job.progress_percent, 100.0);
    }

    #[tokio::test]
    async fn test_concurrent_advance_no_lost_updates() {
        let store = Arc::new(MemStore::new());
        let project = store.insert_project("p").await.unwrap();
        let job = store
            .create_job(project.id, JobType::DocumentAnalysis, 32, None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            let job_id = job.id;
            handles.push(tokio::spawn(async move {
                store.advance_job(job_id, 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.processed_units, 32);
        assert_eq!(job.progress_percent, 100.0);
    }

    #[tokio::test]
    async fn test_update_job_version_conflict() {
        let store = MemStore::new();
        let project = store.insert_project("p").await.unwrap();
        let job = store
            .create_job(project.id, JobType::DocumentAnalysis, 1, None)
            .await
            .unwrap();

        // Another writer bumps the version
        store.advance_job(job.id, 1).await.unwrap();

        let err = store
            .update_job(job.id, job.version, JobPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemStore::new();
        let project = store.insert_project("p").await.unwrap();
        store
            .create_job(project.id, JobType::DocumentAnalysis, 1, None)
            .await
            .unwrap();

        let a = store.claim_pending_jobs("worker-a", 10).await.unwrap();
        let b = store.claim_pending_jobs("worker-b", 10).await.unwrap();
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
        assert_eq!(a[0].claimed_by.as_deref(), Some("worker-a"));
    }

    #[tokio::test]
    async fn test_write_once_document_analysis() {
        let store = MemStore::new();
        let project = store.insert_project("p").await.unwrap();
        let doc = store
            .insert_document(project.id, "contract", 10, "k")
            .await
            .unwrap();

        assert!(store
            .set_document_analysis(doc.id, serde_json::json!({"summary": "a"}))
            .await
            .unwrap());
        assert!(!store
            .set_document_analysis(doc.id, serde_json::json!({"summary": "b"}))
            .await
            .unwrap());

        let doc = store.find_document(doc.id).await.unwrap().unwrap();
        assert_eq!(doc.analysis_result.unwrap()["summary"], "a");
    }
}
