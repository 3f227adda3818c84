//! Store seams consumed by the rest of the pipeline.
//!
//! `TaskStore` is what the workflow engine, intake, and dispatcher
//! need; `TransformStore` adds the reference data and canonical
//! upserts the transform stage uses. Both are implemented by
//! [`crate::StoreClient`]; tests substitute in-memory fakes.

use async_trait::async_trait;

use debtrace_common::{
    Job, JobType, JobUpdate, StagedInvestment, StagedProject, TaskRecord, TaskRequest, TaskUpdate,
};

use crate::error::Result;
use crate::records::{
    Bank, Company, CountryRecord, Form, Investment, Project, ProjectCountry, ProjectSector,
    SectorRecord,
};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Idempotent by `invocation_id`: a repeat call returns the
    /// existing job id with `was_created = false`.
    async fn create_job(&self, invocation_id: &str, job_type: JobType) -> Result<(i64, bool)>;

    /// Applies a partial update and returns the updated job.
    async fn update_job(&self, update: &JobUpdate) -> Result<Job>;

    /// Conflict-ignore bulk insert on `(job_id, source, workflow_type,
    /// url)`; returns only the newly created rows.
    async fn bulk_create_tasks(&self, tasks: &[TaskRequest]) -> Result<Vec<TaskRecord>>;

    async fn update_task(&self, update: &TaskUpdate) -> Result<()>;

    /// Returns the number of rows sent (duplicates are dropped
    /// server-side).
    async fn bulk_insert_staged_projects(&self, records: &[StagedProject]) -> Result<usize>;

    async fn bulk_insert_staged_investments(&self, records: &[StagedInvestment]) -> Result<usize>;
}

#[async_trait]
pub trait TransformStore: TaskStore {
    async fn get_banks(&self) -> Result<Vec<Bank>>;
    async fn get_countries(&self) -> Result<Vec<CountryRecord>>;
    async fn get_sectors(&self) -> Result<Vec<SectorRecord>>;

    async fn get_staged_projects(&self, limit: usize) -> Result<Vec<StagedProject>>;
    async fn get_staged_investments(&self, limit: usize) -> Result<Vec<StagedInvestment>>;

    /// Upserts on `(bank, url)` and returns the stored rows with ids.
    async fn bulk_upsert_projects(&self, records: &[Project]) -> Result<Vec<Project>>;

    /// Conflict-ignore insert. The flag is true when any row was new.
    async fn bulk_insert_project_countries(&self, records: &[ProjectCountry])
        -> Result<(usize, bool)>;
    async fn bulk_insert_project_sectors(&self, records: &[ProjectSector]) -> Result<(usize, bool)>;

    async fn bulk_upsert_companies(&self, records: &[Company]) -> Result<Vec<Company>>;
    async fn bulk_upsert_forms(&self, records: &[Form]) -> Result<Vec<Form>>;
    async fn bulk_upsert_investments(&self, records: &[Investment]) -> Result<Vec<Investment>>;

    async fn delete_staged_projects(&self, ids: &[i64]) -> Result<u64>;
    async fn delete_staged_investments(&self, ids: &[i64]) -> Result<u64>;
}
