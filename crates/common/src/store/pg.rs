//! Postgres store
//!
//! SeaORM implementation of the [`Store`] trait. Every atomic path
//! (creation-time duplicate check, advance, claim, compare-and-swap
//! update) is a single SQL statement so that concurrent processors and
//! the detector never race through read-then-write gaps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, Set, Statement,
};
use uuid::Uuid;

use crate::db::models::{
    AuditRecord, AuditRecordActiveModel, BackgroundJob, BackgroundJobColumn, BackgroundJobEntity,
    Document, DocumentActiveModel, DocumentColumn, DocumentEntity, JobDetail, JobMetadata,
    JobType, Project, ProjectActiveModel, ProjectEntity, ProjectStatus,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};

use super::{apply_patch, JobPatch, Store};

/// Postgres-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_project(&self, name: &str) -> Result<Project> {
        let now = Utc::now();
        let project = ProjectActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            status: Set(String::from(ProjectStatus::Draft)),
            analysis_summary: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        project.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_project(&self, id: Uuid) -> Result<Option<Project>> {
        ProjectEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn promote_project_if_draft(&self, id: Uuid) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE projects
            SET status = 'active', updated_at = NOW()
            WHERE id = $1 AND status = 'draft'
            "#,
            vec![id.into()],
        );
        let result = self.write_conn().execute(stmt).await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // Not promoted: distinguish "already active" from "missing"
        if self.find_project(id).await?.is_none() {
            return Err(AppError::ProjectNotFound { id: id.to_string() });
        }
        Ok(false)
    }

    async fn merge_project_analysis(&self, id: Uuid, fragment: serde_json::Value) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE projects
            SET analysis_summary =
                    COALESCE(analysis_summary, '[]'::jsonb) || jsonb_build_array($2::jsonb),
                updated_at = NOW()
            WHERE id = $1
            "#,
            vec![id.into(), fragment.into()],
        );
        let result = self.write_conn().execute(stmt).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::ProjectNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn insert_document(
        &self,
        project_id: Uuid,
        doc_type: &str,
        size_bytes: i64,
        storage_key: &str,
    ) -> Result<Document> {
        let document = DocumentActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project_id),
            doc_type: Set(doc_type.to_string()),
            size_bytes: Set(size_bytes),
            storage_key: Set(storage_key.to_string()),
            analysis_result: Set(None),
            created_at: Set(Utc::now().into()),
        };
        document.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>> {
        DocumentEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn documents_for_project(&self, project_id: Uuid) -> Result<Vec<Document>> {
        DocumentEntity::find()
            .filter(DocumentColumn::ProjectId.eq(project_id))
            .order_by_asc(DocumentColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn set_document_analysis(
        &self,
        id: Uuid,
        result: serde_json::Value,
    ) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE documents
            SET analysis_result = $2
            WHERE id = $1 AND analysis_result IS NULL
            "#,
            vec![id.into(), result.into()],
        );
        let outcome = self.write_conn().execute(stmt).await?;
        if outcome.rows_affected() > 0 {
            return Ok(true);
        }
        if self.find_document(id).await?.is_none() {
            return Err(AppError::DocumentNotFound { id: id.to_string() });
        }
        Ok(false)
    }

    async fn create_job(
        &self,
        project_id: Uuid,
        job_type: JobType,
        total_units: i32,
        detail: Option<JobDetail>,
    ) -> Result<BackgroundJob> {
        let metadata = serde_json::to_value(JobMetadata {
            detail,
            ..Default::default()
        })?;
        let initial_progress: f64 = if total_units > 0 { 0.0 } else { 100.0 };

        // The duplicate-active guard and the insert are one statement:
        // two racing creators cannot both pass the NOT EXISTS check.
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO background_jobs (
                id, project_id, job_type, status,
                total_units, processed_units, progress_percent, version,
                claimed_by, error_message, metadata,
                created_at, started_at, completed_at, failed_at, last_progress_at
            )
            SELECT $1, $2, $3, 'pending', $4, 0, $5, 1,
                   NULL, NULL, $6, NOW(), NULL, NULL, NULL, NULL
            WHERE NOT EXISTS (
                SELECT 1 FROM background_jobs
                WHERE project_id = $2
                  AND job_type = $3
                  AND status IN ('pending', 'processing')
            )
            RETURNING *
            "#,
            vec![
                Uuid::new_v4().into(),
                project_id.into(),
                String::from(job_type).into(),
                total_units.into(),
                initial_progress.into(),
                metadata.into(),
            ],
        );

        BackgroundJobEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::DuplicateActiveJob {
                project_id: project_id.to_string(),
                job_type: String::from(job_type),
            })
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<BackgroundJob>> {
        BackgroundJobEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn jobs_for_project(&self, project_id: Uuid) -> Result<Vec<BackgroundJob>> {
        BackgroundJobEntity::find()
            .filter(BackgroundJobColumn::ProjectId.eq(project_id))
            .order_by_asc(BackgroundJobColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn advance_job(&self, id: Uuid, units: i32) -> Result<BackgroundJob> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE background_jobs
            SET processed_units = LEAST(processed_units + $2, total_units),
                progress_percent = CASE
                    WHEN total_units <= 0 THEN 100
                    ELSE LEAST(
                        LEAST(processed_units + $2, total_units)::float8
                            / total_units * 100,
                        100
                    )
                END,
                status = CASE WHEN status = 'pending' THEN 'processing' ELSE status END,
                started_at = COALESCE(started_at, NOW()),
                last_progress_at = NOW(),
                version = version + 1
            WHERE id = $1 AND status IN ('pending', 'processing')
            RETURNING *
            "#,
            vec![id.into(), units.into()],
        );

        if let Some(job) = BackgroundJobEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await?
        {
            return Ok(job);
        }

        // No row updated: missing job or terminal state
        match self.find_job(id).await? {
            None => Err(AppError::JobNotFound { id: id.to_string() }),
            Some(job) => Err(AppError::InvalidTransition {
                id: id.to_string(),
                from: job.status,
                to: "advance".to_string(),
            }),
        }
    }

    async fn update_job(
        &self,
        id: Uuid,
        expected_version: i32,
        patch: JobPatch,
    ) -> Result<BackgroundJob> {
        let current = self
            .find_job(id)
            .await?
            .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })?;

        if current.version != expected_version {
            return Err(AppError::VersionConflict {
                id: id.to_string(),
                expected: expected_version,
                found: current.version,
            });
        }

        let next = apply_patch(&current, &patch, Utc::now())?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE background_jobs
            SET status = $2,
                processed_units = $3,
                progress_percent = $4,
                error_message = $5,
                metadata = $6,
                started_at = $7,
                completed_at = $8,
                failed_at = $9,
                claimed_by = $10,
                version = $11
            WHERE id = $1 AND version = $12
            RETURNING *
            "#,
            vec![
                id.into(),
                next.status.clone().into(),
                next.processed_units.into(),
                next.progress_percent.into(),
                next.error_message.clone().into(),
                next.metadata.clone().into(),
                next.started_at.into(),
                next.completed_at.into(),
                next.failed_at.into(),
                next.claimed_by.clone().into(),
                next.version.into(),
                expected_version.into(),
            ],
        );

        if let Some(job) = BackgroundJobEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await?
        {
            return Ok(job);
        }

        // Lost the race between the read and the swap
        match self.find_job(id).await? {
            None => Err(AppError::JobNotFound { id: id.to_string() }),
            Some(job) => Err(AppError::VersionConflict {
                id: id.to_string(),
                expected: expected_version,
                found: job.version,
            }),
        }
    }

    async fn claim_pending_jobs(
        &self,
        worker_id: &str,
        limit: u64,
    ) -> Result<Vec<BackgroundJob>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE background_jobs
            SET status = 'processing',
                claimed_by = $1,
                started_at = COALESCE(started_at, NOW()),
                last_progress_at = NOW(),
                version = version + 1
            WHERE id IN (
                SELECT id FROM background_jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
            vec![worker_id.into(), (limit as i64).into()],
        );

        BackgroundJobEntity::find()
            .from_raw_sql(stmt)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn reclaim_abandoned_jobs(
        &self,
        worker_id: &str,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<BackgroundJob>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE background_jobs
            SET claimed_by = $1,
                last_progress_at = NOW(),
                version = version + 1
            WHERE id IN (
                SELECT id FROM background_jobs
                WHERE status = 'processing'
                  AND COALESCE(last_progress_at, created_at) < $2
                ORDER BY created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
            vec![worker_id.into(), cutoff.into(), (limit as i64).into()],
        );

        BackgroundJobEntity::find()
            .from_raw_sql(stmt)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackgroundJob>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT * FROM background_jobs
            WHERE status IN ('pending', 'processing')
              AND COALESCE(last_progress_at, created_at) < $1
            ORDER BY created_at ASC
            "#,
            vec![cutoff.into()],
        );

        BackgroundJobEntity::find()
            .from_raw_sql(stmt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn record_audit(
        &self,
        action: &str,
        resource_id: Uuid,
        metadata: serde_json::Value,
    ) -> Result<AuditRecord> {
        let record = AuditRecordActiveModel {
            id: Set(Uuid::new_v4()),
            action: Set(action.to_string()),
            resource_id: Set(resource_id),
            metadata: Set(metadata),
            created_at: Set(Utc::now().into()),
        };
        record.insert(self.write_conn()).await.map_err(Into::into)
    }
}
