//! In-memory store fake for transform tests: staged rows live until
//! deleted, upserts assign stable ids, reference data is canned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use debtrace_common::{
    Job, JobType, JobUpdate, StagedInvestment, StagedProject, TaskRecord, TaskRequest, TaskUpdate,
};
use debtrace_store::{
    Bank, Company, CountryRecord, Form, Investment, Project, ProjectCountry, ProjectSector,
    SectorRecord, StoreError, TaskStore, TransformStore,
};

use crate::standardize::NameStandardizer;

/// The alias maps the unit scenarios exercise.
pub fn standardizer_fixture() -> NameStandardizer {
    let countries = HashMap::from([
        ("india".to_string(), "India".to_string()),
        ("indien".to_string(), "India".to_string()),
        ("kosovo".to_string(), "Kosovo".to_string()),
        ("kosovo*".to_string(), "Kosovo".to_string()),
    ]);
    let statuses = HashMap::from([
        ("board approved, pending signing".to_string(), "Pending".to_string()),
        ("dropped".to_string(), "Cancelled".to_string()),
    ]);
    let sectors = HashMap::from([
        ("agriculture".to_string(), "Agribusiness".to_string()),
        ("ac - mini-mills".to_string(), "Agribusiness".to_string()),
        (
            "f-ab - sugar and confectionery".to_string(),
            "Manufacturing".to_string(),
        ),
    ]);
    NameStandardizer::from_maps(countries, statuses, sectors)
}

pub struct MockTransformStore {
    next_project_id: AtomicI64,
    next_company_id: AtomicI64,
    next_form_id: AtomicI64,
    job_type: Mutex<JobType>,
    pub job_updates: Mutex<Vec<JobUpdate>>,
    pub pending_projects: Mutex<Vec<StagedProject>>,
    pub pending_investments: Mutex<Vec<StagedInvestment>>,
    pub upserted_projects: Mutex<Vec<Project>>,
    pub project_countries: Mutex<Vec<ProjectCountry>>,
    pub project_sectors: Mutex<Vec<ProjectSector>>,
    pub upserted_companies: Mutex<Vec<Company>>,
    pub upserted_forms: Mutex<Vec<Form>>,
    pub upserted_investments: Mutex<Vec<Investment>>,
    pub deleted_project_ids: Mutex<Vec<i64>>,
    pub deleted_investment_ids: Mutex<Vec<i64>>,
}

impl MockTransformStore {
    pub fn new() -> Self {
        Self {
            next_project_id: AtomicI64::new(101),
            next_company_id: AtomicI64::new(501),
            next_form_id: AtomicI64::new(701),
            job_type: Mutex::new(JobType::DevBankProjects),
            job_updates: Mutex::new(Vec::new()),
            pending_projects: Mutex::new(Vec::new()),
            pending_investments: Mutex::new(Vec::new()),
            upserted_projects: Mutex::new(Vec::new()),
            project_countries: Mutex::new(Vec::new()),
            project_sectors: Mutex::new(Vec::new()),
            upserted_companies: Mutex::new(Vec::new()),
            upserted_forms: Mutex::new(Vec::new()),
            upserted_investments: Mutex::new(Vec::new()),
            deleted_project_ids: Mutex::new(Vec::new()),
            deleted_investment_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn with_job_type(self, job_type: JobType) -> Self {
        *self.job_type.lock().unwrap() = job_type;
        self
    }

    pub fn push_staged_project(&self, record: StagedProject) {
        self.pending_projects.lock().unwrap().push(record);
    }

    pub fn push_staged_investment(&self, record: StagedInvestment) {
        self.pending_investments.lock().unwrap().push(record);
    }
}

#[async_trait]
impl TaskStore for MockTransformStore {
    async fn create_job(
        &self,
        _invocation_id: &str,
        _job_type: JobType,
    ) -> Result<(i64, bool), StoreError> {
        Ok((1, true))
    }

    async fn update_job(&self, update: &JobUpdate) -> Result<Job, StoreError> {
        self.job_updates.lock().unwrap().push(update.clone());
        Ok(Job {
            id: update.id,
            invocation_id: format!("job-{}", update.id),
            job_type: *self.job_type.lock().unwrap(),
            data_load_stage: update.data_load_stage,
            data_load_start_utc: update.data_load_start_utc,
            data_load_end_utc: update.data_load_end_utc,
            data_clean_stage: update.data_clean_stage,
            data_clean_start_utc: update.data_clean_start_utc,
            data_clean_end_utc: update.data_clean_end_utc,
        })
    }

    async fn bulk_create_tasks(&self, _tasks: &[TaskRequest]) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(Vec::new())
    }

    async fn update_task(&self, _update: &TaskUpdate) -> Result<(), StoreError> {
        Ok(())
    }

    async fn bulk_insert_staged_projects(
        &self,
        records: &[StagedProject],
    ) -> Result<usize, StoreError> {
        self.pending_projects
            .lock()
            .unwrap()
            .extend(records.iter().cloned());
        Ok(records.len())
    }

    async fn bulk_insert_staged_investments(
        &self,
        records: &[StagedInvestment],
    ) -> Result<usize, StoreError> {
        self.pending_investments
            .lock()
            .unwrap()
            .extend(records.iter().cloned());
        Ok(records.len())
    }
}

#[async_trait]
impl TransformStore for MockTransformStore {
    async fn get_banks(&self) -> Result<Vec<Bank>, StoreError> {
        Ok(vec![
            Bank {
                id: 1,
                abbrev_name: "adb".to_string(),
                ac_name: Some("Accountability Mechanism".to_string()),
            },
            Bank {
                id: 2,
                abbrev_name: "bio".to_string(),
                ac_name: None,
            },
        ])
    }

    async fn get_countries(&self) -> Result<Vec<CountryRecord>, StoreError> {
        Ok(vec![
            CountryRecord {
                id: 21,
                name: "India".to_string(),
                iso_code: Some("IN".to_string()),
            },
            CountryRecord {
                id: 22,
                name: "Kosovo".to_string(),
                iso_code: Some("XK".to_string()),
            },
        ])
    }

    async fn get_sectors(&self) -> Result<Vec<SectorRecord>, StoreError> {
        Ok(vec![
            SectorRecord {
                id: 31,
                name: "Agribusiness".to_string(),
            },
            SectorRecord {
                id: 32,
                name: "Manufacturing".to_string(),
            },
        ])
    }

    async fn get_staged_projects(&self, limit: usize) -> Result<Vec<StagedProject>, StoreError> {
        let pending = self.pending_projects.lock().unwrap();
        Ok(pending.iter().take(limit).cloned().collect())
    }

    async fn get_staged_investments(
        &self,
        limit: usize,
    ) -> Result<Vec<StagedInvestment>, StoreError> {
        let pending = self.pending_investments.lock().unwrap();
        Ok(pending.iter().take(limit).cloned().collect())
    }

    async fn bulk_upsert_projects(&self, records: &[Project]) -> Result<Vec<Project>, StoreError> {
        let mut upserted = self.upserted_projects.lock().unwrap();
        let mut result = Vec::with_capacity(records.len());
        for record in records {
            match upserted.iter_mut().find(|p| p.url == record.url) {
                Some(existing) => {
                    let id = existing.id;
                    *existing = record.clone();
                    existing.id = id;
                    result.push(existing.clone());
                }
                None => {
                    let mut stored = record.clone();
                    stored.id = Some(self.next_project_id.fetch_add(1, Ordering::SeqCst));
                    upserted.push(stored.clone());
                    result.push(stored);
                }
            }
        }
        Ok(result)
    }

    async fn bulk_insert_project_countries(
        &self,
        records: &[ProjectCountry],
    ) -> Result<(usize, bool), StoreError> {
        let mut stored = self.project_countries.lock().unwrap();
        let mut created = 0;
        for record in records {
            if !stored.contains(record) {
                stored.push(*record);
                created += 1;
            }
        }
        Ok((created, created > 0))
    }

    async fn bulk_insert_project_sectors(
        &self,
        records: &[ProjectSector],
    ) -> Result<(usize, bool), StoreError> {
        let mut stored = self.project_sectors.lock().unwrap();
        let mut created = 0;
        for record in records {
            if !stored.contains(record) {
                stored.push(*record);
                created += 1;
            }
        }
        Ok((created, created > 0))
    }

    async fn bulk_upsert_companies(&self, records: &[Company]) -> Result<Vec<Company>, StoreError> {
        let mut upserted = self.upserted_companies.lock().unwrap();
        let mut result = Vec::with_capacity(records.len());
        for record in records {
            match upserted.iter().find(|c| c.cik == record.cik) {
                Some(existing) => result.push(existing.clone()),
                None => {
                    let mut stored = record.clone();
                    stored.id = Some(self.next_company_id.fetch_add(1, Ordering::SeqCst));
                    upserted.push(stored.clone());
                    result.push(stored);
                }
            }
        }
        Ok(result)
    }

    async fn bulk_upsert_forms(&self, records: &[Form]) -> Result<Vec<Form>, StoreError> {
        let mut upserted = self.upserted_forms.lock().unwrap();
        let mut result = Vec::with_capacity(records.len());
        for record in records {
            match upserted
                .iter()
                .find(|f| f.accession_number == record.accession_number)
            {
                Some(existing) => result.push(existing.clone()),
                None => {
                    let mut stored = record.clone();
                    stored.id = Some(self.next_form_id.fetch_add(1, Ordering::SeqCst));
                    upserted.push(stored.clone());
                    result.push(stored);
                }
            }
        }
        Ok(result)
    }

    async fn bulk_upsert_investments(
        &self,
        records: &[Investment],
    ) -> Result<Vec<Investment>, StoreError> {
        let mut upserted = self.upserted_investments.lock().unwrap();
        upserted.extend(records.iter().cloned());
        Ok(records.to_vec())
    }

    async fn delete_staged_projects(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let mut pending = self.pending_projects.lock().unwrap();
        let before = pending.len();
        pending.retain(|record| record.id.map_or(true, |id| !ids.contains(&id)));
        self.deleted_project_ids.lock().unwrap().extend(ids);
        Ok((before - pending.len()) as u64)
    }

    async fn delete_staged_investments(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let mut pending = self.pending_investments.lock().unwrap();
        let before = pending.len();
        pending.retain(|record| record.id.map_or(true, |id| !ids.contains(&id)));
        self.deleted_investment_ids.lock().unwrap().extend(ids);
        Ok((before - pending.len()) as u64)
    }
}
