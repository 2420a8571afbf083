//! Audit record entity
//!
//! Insert-only trail for operator interventions. Kept independent of the
//! job record so a forced completion stays traceable even after the job
//! row changes again.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// e.g. "job.force_complete", "project.promote"
    #[sea_orm(column_type = "Text")]
    pub action: String,

    pub resource_id: Uuid,

    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: serde_json::Value,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
