pub mod config;
pub mod types;

pub use config::AppConfig;
pub use types::{
    AuditMessage, Job, JobType, JobUpdate, Source, StageStatus, StagedInvestment, StagedProject,
    TaskRecord, TaskRequest, TaskUpdate, WorkflowType, AUDIT_TIME_FORMAT,
};
