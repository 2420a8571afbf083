//! Document entity
//!
//! Immutable once created except for `analysis_result`, which is written
//! exactly once per successful analysis.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub project_id: Uuid,

    /// Content type tag, e.g. "contract", "correspondence"
    #[sea_orm(column_type = "Text")]
    pub doc_type: String,

    pub size_bytes: i64,

    /// Opaque reference into blob storage
    #[sea_orm(column_type = "Text")]
    pub storage_key: String,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub analysis_result: Option<serde_json::Value>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whether this document already carries an analysis result
    pub fn is_analyzed(&self) -> bool {
        self.analysis_result.is_some()
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
