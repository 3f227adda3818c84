//! In-memory fakes for the engine's three seams: fetcher, store, and
//! publisher. Deterministic tests with no network, no database, no
//! broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use debtrace_bus::{BusError, Publisher};
use debtrace_common::{
    Job, JobType, JobUpdate, StagedInvestment, StagedProject, TaskRecord, TaskRequest, TaskUpdate,
};
use debtrace_fetch::{FetchError, FetchOptions, FetchResponse, PageFetcher};
use debtrace_store::{StoreError, TaskStore};

use crate::registry::EngineDeps;

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Serves canned responses by URL. Unknown URLs answer 404 so code
/// under test exercises its non-success handling.
#[derive(Default)]
pub struct MockFetcher {
    pages: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    post_pages: Mutex<HashMap<String, (u16, Vec<u8>)>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), (200, body.into()));
        self
    }

    pub fn on_status(self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.into()));
        self
    }

    pub fn on_post(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.post_pages
            .lock()
            .unwrap()
            .insert(url.to_string(), (200, body.into()));
        self
    }

    fn lookup(
        map: &Mutex<HashMap<String, (u16, Vec<u8>)>>,
        url: &str,
    ) -> Result<FetchResponse, FetchError> {
        let map = map.lock().unwrap();
        let (status, body) = map
            .get(url)
            .cloned()
            .unwrap_or((404, b"not found".to_vec()));
        Ok(FetchResponse {
            url: url.to_string(),
            status,
            body,
        })
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn get(&self, url: &str, _opts: FetchOptions) -> Result<FetchResponse, FetchError> {
        Self::lookup(&self.pages, url)
    }

    async fn post_json(
        &self,
        url: &str,
        _payload: &serde_json::Value,
        _opts: FetchOptions,
    ) -> Result<FetchResponse, FetchError> {
        Self::lookup(&self.post_pages, url)
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// An in-memory `TaskStore` honoring the two write contracts the
/// engine leans on: `create_job` idempotency and conflict-ignore task
/// creation returning only new rows.
#[derive(Default)]
pub struct MockStore {
    next_id: AtomicI64,
    jobs: Mutex<HashMap<String, i64>>,
    pub job_updates: Mutex<Vec<JobUpdate>>,
    task_keys: Mutex<HashMap<(i64, String, String, String), i64>>,
    pub created_tasks: Mutex<Vec<TaskRecord>>,
    pub task_updates: Mutex<Vec<TaskUpdate>>,
    pub staged_projects: Mutex<Vec<StagedProject>>,
    pub staged_investments: Mutex<Vec<StagedInvestment>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn created_task_count(&self) -> usize {
        self.created_tasks.lock().unwrap().len()
    }

    pub fn last_task_update(&self) -> TaskUpdate {
        self.task_updates
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no task update recorded")
    }
}

#[async_trait]
impl TaskStore for MockStore {
    async fn create_job(
        &self,
        invocation_id: &str,
        _job_type: JobType,
    ) -> Result<(i64, bool), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(id) = jobs.get(invocation_id) {
            return Ok((*id, false));
        }
        let id = self.allocate_id();
        jobs.insert(invocation_id.to_string(), id);
        Ok((id, true))
    }

    async fn update_job(&self, update: &JobUpdate) -> Result<Job, StoreError> {
        self.job_updates.lock().unwrap().push(update.clone());
        Ok(Job {
            id: update.id,
            invocation_id: format!("job-{}", update.id),
            job_type: JobType::DevBankProjects,
            data_load_stage: update.data_load_stage,
            data_load_start_utc: update.data_load_start_utc,
            data_load_end_utc: update.data_load_end_utc,
            data_clean_stage: update.data_clean_stage,
            data_clean_start_utc: update.data_clean_start_utc,
            data_clean_end_utc: update.data_clean_end_utc,
        })
    }

    async fn bulk_create_tasks(
        &self,
        tasks: &[TaskRequest],
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let mut keys = self.task_keys.lock().unwrap();
        let mut created = Vec::new();
        for request in tasks {
            let key = (
                request.job_id,
                request.source.to_string(),
                request.workflow_type.to_string(),
                request.url.clone(),
            );
            if keys.contains_key(&key) {
                continue;
            }
            let id = self.allocate_id();
            keys.insert(key, id);
            let record = TaskRecord {
                id,
                job_id: request.job_id,
                source: request.source,
                workflow_type: request.workflow_type,
                url: request.url.clone(),
            };
            created.push(record.clone());
            self.created_tasks.lock().unwrap().push(record);
        }
        Ok(created)
    }

    async fn update_task(&self, update: &TaskUpdate) -> Result<(), StoreError> {
        self.task_updates.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn bulk_insert_staged_projects(
        &self,
        records: &[StagedProject],
    ) -> Result<usize, StoreError> {
        self.staged_projects
            .lock()
            .unwrap()
            .extend(records.iter().cloned());
        Ok(records.len())
    }

    async fn bulk_insert_staged_investments(
        &self,
        records: &[StagedInvestment],
    ) -> Result<usize, StoreError> {
        self.staged_investments
            .lock()
            .unwrap()
            .extend(records.iter().cloned());
        Ok(records.len())
    }
}

// ---------------------------------------------------------------------------
// MockPublisher
// ---------------------------------------------------------------------------

/// Captures published payloads. `fail_after(n)` makes every publish
/// past the first `n` fail, for partial-publish tests.
#[derive(Default)]
pub struct MockPublisher {
    pub published: Mutex<Vec<serde_json::Value>>,
    fail_after: Mutex<Option<usize>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_after(self, successes: usize) -> Self {
        *self.fail_after.lock().unwrap() = Some(successes);
        self
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, data: &serde_json::Value) -> Result<(), BusError> {
        let mut published = self.published.lock().unwrap();
        if let Some(limit) = *self.fail_after.lock().unwrap() {
            if published.len() >= limit {
                return Err(BusError::Api {
                    status: 503,
                    message: "publish rejected".to_string(),
                });
            }
        }
        published.push(data.clone());
        Ok(())
    }
}

/// Fresh deps over empty mocks, enough to instantiate any workflow.
pub fn test_deps() -> EngineDeps {
    EngineDeps {
        fetcher: Arc::new(MockFetcher::new()),
        store: Arc::new(MockStore::new()),
        publisher: Arc::new(MockPublisher::new()),
        config_dir: "config".to_string(),
    }
}
