//! Project entity - the parent record owning documents and jobs

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Project lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Active,
    Closed,
}

impl From<String> for ProjectStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "draft" => ProjectStatus::Draft,
            "active" => ProjectStatus::Active,
            "closed" => ProjectStatus::Closed,
            _ => ProjectStatus::Draft,
        }
    }
}

impl From<ProjectStatus> for String {
    fn from(status: ProjectStatus) -> Self {
        match status {
            ProjectStatus::Draft => "draft".to_string(),
            ProjectStatus::Active => "active".to_string(),
            ProjectStatus::Closed => "closed".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// Aggregated analysis results, appended to by the processor
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub analysis_summary: Option<serde_json::Value>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the project status as an enum
    pub fn project_status(&self) -> ProjectStatus {
        ProjectStatus::from(self.status.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::document::Entity")]
    Documents,

    #[sea_orm(has_many = "super::background_job::Entity")]
    BackgroundJobs,
}

impl Related<super::document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Documents.def()
    }
}

impl Related<super::background_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BackgroundJobs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
