//! United Nations Development Programme (UNDP). The open-data API
//! exports every project id as CSV; per-project JSON documents carry
//! the detail.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::{ProjectScrapeStrategy, SeedStrategy};

use super::clean_field;

const BANK: &str = "UNDP";
const EXPORT_URL: &str = "https://api.open.undp.org/api/v1/undp/export_csv/";

fn api_url(project_id: &str) -> String {
    format!("https://api.open.undp.org/api/projects/{project_id}.json")
}

fn public_url(project_id: &str) -> String {
    format!("https://open.undp.org/projects/{project_id}")
}

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

pub struct UndpSeeder {
    fetcher: Arc<dyn PageFetcher>,
}

impl UndpSeeder {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SeedStrategy for UndpSeeder {
    async fn seed_urls(&self) -> Result<Vec<String>> {
        let export = self
            .fetcher
            .get(EXPORT_URL, FetchOptions::new().no_timeout())
            .await?
            .ensure_success()?;
        parse_project_ids(&export.body)
    }
}

fn parse_project_ids(body: &[u8]) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(body);
    let headers = reader
        .headers()
        .map_err(|e| WorkflowError::scrape(format!("unreadable project export header. {e}")))?
        .clone();
    let id_index = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("project_id"))
        .ok_or_else(|| WorkflowError::scrape("project export is missing a project_id column"))?;

    let mut urls = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| WorkflowError::scrape(format!("bad row in project export. {e}")))?;
        if let Some(id) = row.get(id_index).map(str::trim).filter(|id| !id.is_empty()) {
            urls.push(api_url(id));
        }
    }
    Ok(urls)
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UndpProject {
    project_id: String,
    #[serde(default)]
    project_title: Option<String>,
    #[serde(default)]
    project_descr: Option<String>,
    #[serde(default)]
    iati_op_id: Option<String>,
    #[serde(default)]
    operating_unit: Option<String>,
    #[serde(default)]
    sector: Vec<NamedEntry>,
    #[serde(default)]
    budget: Option<f64>,
    #[serde(default)]
    start: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedEntry {
    #[serde(default)]
    name: Option<String>,
}

pub struct UndpProjectScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl UndpProjectScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ProjectScrapeStrategy for UndpProjectScraper {
    async fn scrape_project_page(&self, url: &str) -> Result<Vec<StagedProject>> {
        let body = self
            .fetcher
            .get(url, FetchOptions::new())
            .await?
            .ensure_success()?;
        let project: UndpProject = body
            .json()
            .map_err(|_| WorkflowError::scrape("project document is not the expected JSON"))?;
        Ok(vec![clean_project(project)])
    }
}

fn clean_project(project: UndpProject) -> StagedProject {
    let sectors = {
        let names: Vec<String> = project
            .sector
            .iter()
            .filter_map(|entry| entry.name.as_deref().and_then(clean_field))
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(names.join(", "))
        }
    };
    let year = project
        .start
        .as_deref()
        .and_then(|raw| raw.get(..4))
        .and_then(|y| y.parse().ok());

    StagedProject {
        bank: BANK.to_string(),
        number: Some(project.project_id.clone()),
        name: project
            .project_title
            .or(project.project_descr)
            .as_deref()
            .and_then(clean_field),
        year,
        loan_amount: project.budget,
        loan_amount_currency: project.budget.map(|_| "USD".to_string()),
        loan_amount_usd: project.budget,
        sectors,
        countries: project.operating_unit.as_deref().and_then(clean_field),
        companies: project.iati_op_id.as_deref().and_then(clean_field),
        url: public_url(&project.project_id),
        ..StagedProject::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_ids_become_api_urls() {
        let csv_body = "project_id,title\n00110684,Support to Elections\n,blank\n";
        let urls = parse_project_ids(csv_body.as_bytes()).unwrap();
        assert_eq!(
            urls,
            vec!["https://api.open.undp.org/api/projects/00110684.json"]
        );
    }

    #[test]
    fn project_document_cleans_into_a_staged_record() {
        let raw = r#"{
            "project_id": "00110684",
            "project_title": "Support to Elections",
            "operating_unit": "Somalia",
            "sector": [{"name": "Governance"}, {"name": "Rule of Law"}],
            "budget": 4200000.0,
            "start": "2019-01-01"
        }"#;
        let project: UndpProject = serde_json::from_str(raw).unwrap();
        let record = clean_project(project);

        assert_eq!(record.bank, "UNDP");
        assert_eq!(record.number.as_deref(), Some("00110684"));
        assert_eq!(record.sectors.as_deref(), Some("Governance, Rule of Law"));
        assert_eq!(record.countries.as_deref(), Some("Somalia"));
        assert_eq!(record.year, Some(2019));
        assert_eq!(record.url, "https://open.undp.org/projects/00110684");
    }
}
