//! Background job entity for async processing
//!
//! A durable record tracking one processing stage over a set of units
//! (documents or chunks). Mutated only through the job lifecycle
//! operations; `version` is the optimistic-concurrency token bumped on
//! every write.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Job status enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => JobStatus::Pending,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => "pending".to_string(),
            JobStatus::Processing => "processing".to_string(),
            JobStatus::Completed => "completed".to_string(),
            JobStatus::Failed => "failed".to_string(),
        }
    }
}

/// Job type tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    DocumentAnalysis,
    Reanalysis,
}

impl From<String> for JobType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "document_analysis" => JobType::DocumentAnalysis,
            "reanalysis" => JobType::Reanalysis,
            _ => JobType::DocumentAnalysis,
        }
    }
}

impl From<JobType> for String {
    fn from(job_type: JobType) -> Self {
        match job_type {
            JobType::DocumentAnalysis => "document_analysis".to_string(),
            JobType::Reanalysis => "reanalysis".to_string(),
        }
    }
}

/// Per-type job detail, tagged so downstream code never guesses at
/// metadata shapes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "snake_case")]
pub enum JobDetail {
    DocumentAnalysis {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        analyzer_model: Option<String>,
    },
    Reanalysis {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requested_by: Option<String>,
    },
}

/// Typed job metadata
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Set by the manual emergency override, never by organic completion
    #[serde(default)]
    pub force_completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_completed_at: Option<DateTime<Utc>>,

    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub detail: Option<JobDetail>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "background_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub project_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub job_type: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// Unit count fixed at creation
    pub total_units: i32,

    /// Monotonically non-decreasing, clamped at total_units
    pub processed_units: i32,

    /// Derived from processed/total, capped at 100
    pub progress_percent: f64,

    /// Optimistic-concurrency token
    pub version: i32,

    /// Worker holding the processing claim
    #[sea_orm(column_type = "Text", nullable)]
    pub claimed_by: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: serde_json::Value,

    pub created_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,

    pub failed_at: Option<DateTimeWithTimeZone>,

    /// Staleness anchor, refreshed on claim and on every advance
    pub last_progress_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Get the job status as an enum
    pub fn job_status(&self) -> JobStatus {
        JobStatus::from(self.status.clone())
    }

    /// Get the job type as an enum
    pub fn kind(&self) -> JobType {
        JobType::from(self.job_type.clone())
    }

    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.job_status().is_terminal()
    }

    /// Calculate progress percentage from the unit counters
    pub fn computed_progress(&self) -> f64 {
        progress_percent(self.processed_units, self.total_units)
    }

    /// Decode the typed metadata; malformed records read as empty
    pub fn job_metadata(&self) -> JobMetadata {
        serde_json::from_value(self.metadata.clone()).unwrap_or_default()
    }

    /// The timestamp staleness is measured against
    pub fn staleness_anchor(&self) -> DateTimeWithTimeZone {
        self.last_progress_at.unwrap_or(self.created_at)
    }
}

/// Derived progress, capped at 100. Zero-unit jobs report 100 so that
/// an empty project completes instead of hanging at 0%.
pub fn progress_percent(processed: i32, total: i32) -> f64 {
    if total <= 0 {
        100.0
    } else {
        ((processed as f64 / total as f64) * 100.0).min(100.0)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_capped() {
        assert_eq!(progress_percent(5, 10), 50.0);
        assert_eq!(progress_percent(10, 10), 100.0);
        assert_eq!(progress_percent(12, 10), 100.0);
        assert_eq!(progress_percent(0, 0), 100.0);
    }

    #[test]
    fn test_metadata_round_trip() {
        let meta = JobMetadata {
            force_completed: true,
            force_completed_at: Some(Utc::now()),
            detail: Some(JobDetail::DocumentAnalysis {
                analyzer_model: Some("dossier-analyst-1".into()),
            }),
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["force_completed"], true);
        assert_eq!(value["job_type"], "document_analysis");
        let back: JobMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_status_text_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from(String::from(status)), status);
        }
    }
}
