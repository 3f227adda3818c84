//! KfW Development Bank. The project database exposes a single JSON
//! download holding every record.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::DownloadStrategy;

use super::{date_parts, parse_flexible_date};

const BANK: &str = "KFW";
const DOWNLOAD_URL: &str = "https://www.kfw-entwicklungsbank.de/ipfz/Projektdatenbank/download/json";
const PROJECTS_BASE_URL: &str = "https://www.kfw-entwicklungsbank.de/ipfz/Projektdatenbank";

#[derive(Debug, Deserialize)]
struct KfwRow {
    #[serde(rename = "projnr")]
    number: String,
    #[serde(rename = "title")]
    name: String,
    #[serde(default)]
    status: Option<String>,
    /// Commitment in millions of euros.
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default, rename = "focus")]
    sectors: Option<String>,
    #[serde(default, rename = "country")]
    countries: Option<String>,
    #[serde(default, rename = "responsible")]
    companies: Option<String>,
    #[serde(default, rename = "hostDate")]
    host_date: Option<String>,
}

pub struct KfwDownloader {
    fetcher: Arc<dyn PageFetcher>,
}

impl KfwDownloader {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl DownloadStrategy for KfwDownloader {
    async fn fetch_projects(&self) -> Result<Vec<StagedProject>> {
        let download = self
            .fetcher
            .get(DOWNLOAD_URL, FetchOptions::new().no_timeout())
            .await?
            .ensure_success()?;
        let rows: Vec<KfwRow> = download
            .json()
            .map_err(|_| WorkflowError::scrape("KFW download is not the expected JSON array"))?;
        Ok(rows.into_iter().map(clean_row).collect())
    }
}

fn clean_row(row: KfwRow) -> StagedProject {
    let (year, month, day) = row
        .host_date
        .as_deref()
        .and_then(parse_flexible_date)
        .map(date_parts)
        .unwrap_or((None, None, None));

    let url = format!(
        "{PROJECTS_BASE_URL}/{}-{}.htm",
        row.name.replace(' ', "-"),
        row.number
    );

    StagedProject {
        bank: BANK.to_string(),
        number: Some(row.number),
        name: Some(row.name),
        status: row.status,
        year,
        month,
        day,
        loan_amount: row.amount.map(|m| m * 1e6),
        loan_amount_currency: row.amount.map(|_| "EUR".to_string()),
        sectors: row.sectors,
        countries: row.countries,
        companies: row.companies,
        url,
        ..StagedProject::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_rows_clean_into_staged_projects() {
        let raw = r#"[{
            "projnr": "29193",
            "title": "Water Supply Gaza",
            "status": "Ongoing",
            "amount": 24.5,
            "focus": "Water supply",
            "country": "Palestinian territories",
            "responsible": "Palestinian Water Authority",
            "hostDate": "2020-11-12"
        }]"#;
        let rows: Vec<KfwRow> = serde_json::from_str(raw).unwrap();
        let record = clean_row(rows.into_iter().next().unwrap());

        assert_eq!(record.bank, "KFW");
        assert_eq!(record.number.as_deref(), Some("29193"));
        assert!((record.loan_amount.unwrap() - 24.5e6).abs() < 1e-6);
        assert_eq!(record.loan_amount_currency.as_deref(), Some("EUR"));
        assert_eq!((record.year, record.month, record.day), (Some(2020), Some(11), Some(12)));
        assert_eq!(
            record.url,
            "https://www.kfw-entwicklungsbank.de/ipfz/Projektdatenbank/Water-Supply-Gaza-29193.htm"
        );
    }

    #[test]
    fn missing_optional_fields_stay_none() {
        let rows: Vec<KfwRow> =
            serde_json::from_str(r#"[{"projnr": "1", "title": "X"}]"#).unwrap();
        let record = clean_row(rows.into_iter().next().unwrap());
        assert!(record.loan_amount.is_none());
        assert!(record.loan_amount_currency.is_none());
        assert!(record.year.is_none());
    }
}
