//! DEG (Deutsche Investitions- und Entwicklungsgesellschaft). The
//! investment map's REST action returns the full portfolio as JSON.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::DownloadStrategy;

const BANK: &str = "DEG";
const DOWNLOAD_URL: &str = "https://deginvest-investments.de/?tx_deginvests_rest%5Baction%5D=list&tx_deginvests_rest%5Bcontroller%5D=Rest&cHash=f8602c3bfb7e71d9760e1412bc0c8bb5";
const PROJECTS_BASE_URL: &str = "https://deginvest-investments.de";

#[derive(Debug, Deserialize)]
struct DegRow {
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    sector: Option<String>,
    /// Commitment in millions of euros.
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    uid: Option<i64>,
}

pub struct DegDownloader {
    fetcher: Arc<dyn PageFetcher>,
}

impl DegDownloader {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl DownloadStrategy for DegDownloader {
    async fn fetch_projects(&self) -> Result<Vec<StagedProject>> {
        let download = self
            .fetcher
            .get(DOWNLOAD_URL, FetchOptions::new().no_timeout())
            .await?
            .ensure_success()?;
        let rows: Vec<DegRow> = download
            .json()
            .map_err(|_| WorkflowError::scrape("DEG portfolio is not the expected JSON array"))?;
        Ok(rows.into_iter().filter_map(clean_row).collect())
    }
}

/// Rows without an identifier cannot be staged (no stable URL).
fn clean_row(row: DegRow) -> Option<StagedProject> {
    let slug = match (&row.slug, row.uid) {
        (Some(slug), _) if !slug.trim().is_empty() => slug.trim().to_string(),
        (_, Some(uid)) => uid.to_string(),
        _ => return None,
    };

    Some(StagedProject {
        bank: BANK.to_string(),
        name: row.customer.clone(),
        year: row.year,
        loan_amount: row.amount.map(|m| m * 1e6),
        loan_amount_currency: row.amount.map(|_| "EUR".to_string()),
        sectors: row.sector,
        countries: row.country,
        companies: row.customer,
        url: format!("{PROJECTS_BASE_URL}/investition/{slug}"),
        ..StagedProject::default()
    })
}
