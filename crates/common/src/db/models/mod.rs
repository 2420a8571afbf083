//! SeaORM entity models
//!
//! Database entities for Dossier

mod audit_record;
mod background_job;
mod document;
mod project;

pub use project::{
    Entity as ProjectEntity,
    Model as Project,
    ActiveModel as ProjectActiveModel,
    Column as ProjectColumn,
    ProjectStatus,
};

pub use document::{
    Entity as DocumentEntity,
    Model as Document,
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
};

pub use background_job::{
    progress_percent,
    Entity as BackgroundJobEntity,
    Model as BackgroundJob,
    ActiveModel as BackgroundJobActiveModel,
    Column as BackgroundJobColumn,
    JobDetail,
    JobMetadata,
    JobStatus,
    JobType,
};

pub use audit_record::{
    Entity as AuditRecordEntity,
    Model as AuditRecord,
    ActiveModel as AuditRecordActiveModel,
    Column as AuditRecordColumn,
};
