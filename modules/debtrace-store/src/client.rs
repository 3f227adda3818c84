//! Concrete storage gateway over the pipeline's JSON REST API.
//!
//! Bulk writes are chunked into fixed-size batches; every batch is one
//! POST with `{"upsert": bool, "records": [...], "batch_size": n}`.
//! The API answers 201 when any row was created and 200 when
//! everything already existed, returning the affected rows.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use debtrace_common::{
    Job, JobType, JobUpdate, StagedInvestment, StagedProject, TaskRecord, TaskRequest, TaskUpdate,
};

use crate::error::{Result, StoreError};
use crate::records::{
    Bank, Company, CountryRecord, Form, Investment, Project, ProjectCountry, ProjectSector,
    SectorRecord,
};
use crate::traits::{TaskStore, TransformStore};

/// Rows per bulk POST.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

pub struct StoreClient {
    client: reqwest::Client,
    base_url: String,
    batch_size: usize,
}

impl StoreClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(
        response: reqwest::Response,
        record_type: &'static str,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(StoreError::Api {
                record_type,
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn get_records<R: DeserializeOwned>(
        &self,
        path: &str,
        record_type: &'static str,
    ) -> Result<Vec<R>> {
        debug!(record_type, path, "Fetching records from store");
        let response = self.client.get(self.url(path)).send().await?;
        let response = Self::check(response, record_type).await?;
        let records = response
            .json::<Vec<R>>()
            .await
            .map_err(|e| StoreError::Decode {
                record_type,
                message: e.to_string(),
            })?;
        Ok(records)
    }

    /// Chunked bulk insert or upsert. Returns the rows the API handed
    /// back across all batches and the last status code seen.
    async fn bulk_operation<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        records: &[T],
        record_type: &'static str,
        upsert: bool,
    ) -> Result<(Vec<R>, u16)> {
        if records.is_empty() {
            return Ok((Vec::new(), 200));
        }

        let num_batches = records.len().div_ceil(self.batch_size);
        let mut returned = Vec::new();
        let mut last_status = 200u16;

        for (batch_num, batch) in records.chunks(self.batch_size).enumerate() {
            debug!(
                record_type,
                batch = batch_num + 1,
                of = num_batches,
                rows = batch.len(),
                "Performing bulk operation"
            );
            let payload = serde_json::json!({
                "upsert": upsert,
                "records": batch,
                "batch_size": self.batch_size,
            });
            let response = self.client.post(self.url(path)).json(&payload).send().await?;
            let response = Self::check(response, record_type).await?;
            last_status = response.status().as_u16();
            let mut rows: Vec<R> = response.json().await.map_err(|e| StoreError::Decode {
                record_type,
                message: e.to_string(),
            })?;
            returned.append(&mut rows);
        }

        Ok((returned, last_status))
    }

    async fn delete_by_ids(
        &self,
        path: &str,
        ids: &[i64],
        record_type: &'static str,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let payload = serde_json::json!({ "ids": ids });
        let response = self
            .client
            .delete(self.url(path))
            .json(&payload)
            .send()
            .await?;
        let response = Self::check(response, record_type).await?;
        let deleted: u64 = response.json().await.map_err(|e| StoreError::Decode {
            record_type,
            message: e.to_string(),
        })?;
        info!(record_type, deleted, "Deleted staged records");
        Ok(deleted)
    }
}

#[async_trait]
impl TaskStore for StoreClient {
    async fn create_job(&self, invocation_id: &str, job_type: JobType) -> Result<(i64, bool)> {
        let payload = serde_json::json!({
            "invocation_id": invocation_id,
            "job_type": job_type,
        });
        let response = self
            .client
            .post(self.url("/api/pipeline/jobs"))
            .json(&payload)
            .send()
            .await?;
        let response = Self::check(response, "jobs").await?;
        let was_created = response.status().as_u16() == 201;
        let job: Job = response.json().await.map_err(|e| StoreError::Decode {
            record_type: "jobs",
            message: e.to_string(),
        })?;
        Ok((job.id, was_created))
    }

    async fn update_job(&self, update: &JobUpdate) -> Result<Job> {
        let path = format!("/api/pipeline/jobs/{}", update.id);
        let response = self
            .client
            .patch(self.url(&path))
            .json(update)
            .send()
            .await?;
        let response = Self::check(response, "jobs").await?;
        response.json().await.map_err(|e| StoreError::Decode {
            record_type: "jobs",
            message: e.to_string(),
        })
    }

    async fn bulk_create_tasks(&self, tasks: &[TaskRequest]) -> Result<Vec<TaskRecord>> {
        let (created, _) = self
            .bulk_operation("/api/pipeline/tasks", tasks, "tasks", false)
            .await?;
        Ok(created)
    }

    async fn update_task(&self, update: &TaskUpdate) -> Result<()> {
        let path = format!("/api/pipeline/tasks/{}", update.id);
        let response = self
            .client
            .patch(self.url(&path))
            .json(update)
            .send()
            .await?;
        Self::check(response, "tasks").await?;
        Ok(())
    }

    async fn bulk_insert_staged_projects(&self, records: &[StagedProject]) -> Result<usize> {
        let (_, _): (Vec<serde_json::Value>, u16) = self
            .bulk_operation(
                "/api/pipeline/staged-projects",
                records,
                "staged projects",
                false,
            )
            .await?;
        Ok(records.len())
    }

    async fn bulk_insert_staged_investments(&self, records: &[StagedInvestment]) -> Result<usize> {
        let (_, _): (Vec<serde_json::Value>, u16) = self
            .bulk_operation(
                "/api/pipeline/staged-investments",
                records,
                "staged investments",
                false,
            )
            .await?;
        Ok(records.len())
    }
}

#[async_trait]
impl TransformStore for StoreClient {
    async fn get_banks(&self) -> Result<Vec<Bank>> {
        self.get_records("/api/banks", "banks").await
    }

    async fn get_countries(&self) -> Result<Vec<CountryRecord>> {
        self.get_records("/api/countries?fields=id,name,iso_code", "countries")
            .await
    }

    async fn get_sectors(&self) -> Result<Vec<SectorRecord>> {
        self.get_records("/api/sectors", "sectors").await
    }

    async fn get_staged_projects(&self, limit: usize) -> Result<Vec<StagedProject>> {
        let path = format!("/api/pipeline/staged-projects?limit={limit}");
        self.get_records(&path, "staged projects").await
    }

    async fn get_staged_investments(&self, limit: usize) -> Result<Vec<StagedInvestment>> {
        let path = format!("/api/pipeline/staged-investments?limit={limit}");
        self.get_records(&path, "staged investments").await
    }

    async fn bulk_upsert_projects(&self, records: &[Project]) -> Result<Vec<Project>> {
        let (rows, _) = self
            .bulk_operation("/api/projects", records, "projects", true)
            .await?;
        Ok(rows)
    }

    async fn bulk_insert_project_countries(
        &self,
        records: &[ProjectCountry],
    ) -> Result<(usize, bool)> {
        let (rows, status): (Vec<ProjectCountry>, u16) = self
            .bulk_operation(
                "/api/countries/project-countries",
                records,
                "project countries",
                false,
            )
            .await?;
        Ok((rows.len(), status == 201))
    }

    async fn bulk_insert_project_sectors(
        &self,
        records: &[ProjectSector],
    ) -> Result<(usize, bool)> {
        let (rows, status): (Vec<ProjectSector>, u16) = self
            .bulk_operation(
                "/api/sectors/project-sectors",
                records,
                "project sectors",
                false,
            )
            .await?;
        Ok((rows.len(), status == 201))
    }

    async fn bulk_upsert_companies(&self, records: &[Company]) -> Result<Vec<Company>> {
        let (rows, _) = self
            .bulk_operation("/api/form13f/companies", records, "companies", true)
            .await?;
        Ok(rows)
    }

    async fn bulk_upsert_forms(&self, records: &[Form]) -> Result<Vec<Form>> {
        let (rows, _) = self
            .bulk_operation("/api/form13f/forms", records, "forms", true)
            .await?;
        Ok(rows)
    }

    async fn bulk_upsert_investments(&self, records: &[Investment]) -> Result<Vec<Investment>> {
        let (rows, _) = self
            .bulk_operation("/api/form13f/investments", records, "investments", true)
            .await?;
        Ok(rows)
    }

    async fn delete_staged_projects(&self, ids: &[i64]) -> Result<u64> {
        self.delete_by_ids("/api/pipeline/staged-projects", ids, "staged projects")
            .await
    }

    async fn delete_staged_investments(&self, ids: &[i64]) -> Result<u64> {
        self.delete_by_ids("/api/pipeline/staged-investments", ids, "staged investments")
            .await
    }
}
