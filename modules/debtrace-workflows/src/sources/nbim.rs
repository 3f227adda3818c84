//! Norges Bank Investment Management (NBIM). The fund publishes its
//! equity holdings per year through a JSON history endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde::Deserialize;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::DownloadStrategy;

const BANK: &str = "NBIM";
const FUND_BASE_URL: &str = "https://www.nbim.no/en/the-fund/investments";

fn history_url(year: i32) -> String {
    format!("https://www.nbim.no/api/investments/history.json?year={year}")
}

#[derive(Debug, Deserialize)]
struct NbimHistory {
    #[serde(default)]
    investments: Vec<NbimRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NbimRow {
    name: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    industry: Option<String>,
    /// Market value in the fund's reporting currency (NOK).
    #[serde(default)]
    market_value: Option<f64>,
}

pub struct NbimDownloader {
    fetcher: Arc<dyn PageFetcher>,
}

impl NbimDownloader {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl DownloadStrategy for NbimDownloader {
    async fn fetch_projects(&self) -> Result<Vec<StagedProject>> {
        // Holdings for a year publish early the following year.
        let year = Utc::now().year() - 1;
        let download = self
            .fetcher
            .get(&history_url(year), FetchOptions::new().no_timeout())
            .await?
            .ensure_success()?;
        let history: NbimHistory = download
            .json()
            .map_err(|_| WorkflowError::scrape("NBIM history payload is not the expected JSON"))?;
        Ok(history
            .investments
            .into_iter()
            .map(|row| clean_row(row, year))
            .collect())
    }
}

fn clean_row(row: NbimRow, year: i32) -> StagedProject {
    let slug: String = row
        .name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();

    StagedProject {
        bank: BANK.to_string(),
        name: Some(row.name.clone()),
        year: Some(year),
        loan_amount: row.market_value,
        loan_amount_currency: row.market_value.map(|_| "NOK".to_string()),
        sectors: row.industry,
        countries: row.country,
        companies: Some(row.name),
        url: format!("{FUND_BASE_URL}#/{year}/investments/{slug}"),
        ..StagedProject::default()
    }
}
