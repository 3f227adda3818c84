//! World Bank. The projects API offers a CSV export of every project.

use std::sync::Arc;

use async_trait::async_trait;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::DownloadStrategy;

use super::{clean_field, date_parts, parse_amount, parse_flexible_date};

const BANK: &str = "WB";
const DOWNLOAD_URL: &str = "http://search.worldbank.org/api/projects/all.csv";

pub struct WbDownloader {
    fetcher: Arc<dyn PageFetcher>,
}

impl WbDownloader {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl DownloadStrategy for WbDownloader {
    async fn fetch_projects(&self) -> Result<Vec<StagedProject>> {
        let download = self
            .fetcher
            .get(DOWNLOAD_URL, FetchOptions::new().no_timeout())
            .await?
            .ensure_success()?;
        parse_csv(&download.body)
    }
}

fn parse_csv(body: &[u8]) -> Result<Vec<StagedProject>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(body);
    let headers = reader
        .headers()
        .map_err(|e| WorkflowError::scrape(format!("unreadable projects CSV header. {e}")))?
        .clone();
    let index = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));

    let id_idx = index("id")
        .ok_or_else(|| WorkflowError::scrape("projects CSV is missing an id column"))?;
    let name_idx = index("project_name");
    let country_idx = index("countryshortname");
    let sector_idx = index("sector1");
    let status_idx = index("status");
    let date_idx = index("boardapprovaldate");
    let amount_idx = index("totalamt");
    let url_idx = index("url");

    let get = |row: &csv::StringRecord, idx: Option<usize>| -> Option<String> {
        idx.and_then(|i| row.get(i)).and_then(clean_field)
    };

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| WorkflowError::scrape(format!("bad row in projects CSV. {e}")))?;
        let Some(id) = row.get(id_idx).and_then(clean_field) else {
            continue;
        };

        let (year, month, day) = get(&row, date_idx)
            .map(|raw| raw.chars().take(10).collect::<String>())
            .as_deref()
            .and_then(parse_flexible_date)
            .map(date_parts)
            .unwrap_or((None, None, None));
        let amount = get(&row, amount_idx).as_deref().and_then(parse_amount);
        let url = get(&row, url_idx)
            .unwrap_or_else(|| format!("https://projects.worldbank.org/en/projects-operations/project-detail/{id}"));

        records.push(StagedProject {
            bank: BANK.to_string(),
            number: Some(id),
            name: get(&row, name_idx),
            status: get(&row, status_idx),
            year,
            month,
            day,
            loan_amount: amount,
            loan_amount_currency: amount.map(|_| "USD".to_string()),
            loan_amount_usd: amount,
            sectors: get(&row, sector_idx),
            countries: get(&row, country_idx),
            url,
            ..StagedProject::default()
        });
    }
    Ok(records)
}
