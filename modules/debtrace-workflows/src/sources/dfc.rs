//! U.S. International Development Finance Corporation (DFC). The
//! active-project list sits behind a POST endpoint and repeats a
//! project once per disbursement, so rows are grouped by project
//! number before staging.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::DownloadStrategy;

use super::{date_parts, parse_flexible_date};

const BANK: &str = "DFC";
const DOWNLOAD_URL: &str = "https://www3.dfc.gov/OPICProjects/Home/GetOPICActiveProjectList";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DfcRow {
    project_number: String,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    department: Option<String>,
    #[serde(default)]
    project_status: Option<String>,
    #[serde(default)]
    committed_amount: Option<f64>,
    #[serde(default)]
    board_date: Option<String>,
    #[serde(default)]
    project_profile_url: Option<String>,
}

pub struct DfcDownloader {
    fetcher: Arc<dyn PageFetcher>,
}

impl DfcDownloader {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl DownloadStrategy for DfcDownloader {
    async fn fetch_projects(&self) -> Result<Vec<StagedProject>> {
        let download = self
            .fetcher
            .post_json(
                DOWNLOAD_URL,
                &serde_json::json!({}),
                FetchOptions::new().no_timeout(),
            )
            .await?
            .ensure_success()?;
        let rows: Vec<DfcRow> = download
            .json()
            .map_err(|_| WorkflowError::scrape("DFC project list is not the expected JSON array"))?;
        Ok(group_rows(rows))
    }
}

/// Collapses repeated rows per project: amounts sum, list-ish fields
/// keep their unique values in first-seen order.
fn group_rows(rows: Vec<DfcRow>) -> Vec<StagedProject> {
    let mut grouped: BTreeMap<String, StagedProject> = BTreeMap::new();

    for row in rows {
        let number = row.project_number.trim().to_string();
        if number.is_empty() {
            continue;
        }
        let entry = grouped.entry(number.clone()).or_insert_with(|| {
            let (year, month, day) = row
                .board_date
                .as_deref()
                .map(|d| d.chars().take(10).collect::<String>())
                .as_deref()
                .and_then(parse_flexible_date)
                .map(date_parts)
                .unwrap_or((None, None, None));
            StagedProject {
                bank: BANK.to_string(),
                number: Some(number.clone()),
                name: row.project_name.clone(),
                status: row.project_status.clone(),
                year,
                month,
                day,
                loan_amount: Some(0.0),
                loan_amount_currency: Some("USD".to_string()),
                url: row
                    .project_profile_url
                    .clone()
                    .unwrap_or_else(|| format!("https://www.dfc.gov/what-we-do/active-projects/{number}")),
                ..StagedProject::default()
            }
        });

        if let (Some(total), Some(amount)) = (entry.loan_amount.as_mut(), row.committed_amount) {
            *total += amount;
        }
        append_unique(&mut entry.countries, row.country.as_deref());
        append_unique(&mut entry.sectors, row.department.as_deref());
    }

    let mut records: Vec<StagedProject> = grouped.into_values().collect();
    for record in &mut records {
        record.loan_amount_usd = record.loan_amount;
    }
    records
}

fn append_unique(field: &mut Option<String>, value: Option<&str>) {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return;
    };
    match field {
        None => *field = Some(value.to_string()),
        Some(existing) => {
            let already = existing.split(", ").any(|v| v == value);
            if !already {
                existing.push_str(", ");
                existing.push_str(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(number: &str, country: &str, amount: f64) -> DfcRow {
        serde_json::from_value(serde_json::json!({
            "projectNumber": number,
            "projectName": "Solar Expansion",
            "country": country,
            "department": "Energy",
            "projectStatus": "Active",
            "committedAmount": amount,
            "boardDate": "2022-06-15T00:00:00",
            "projectProfileUrl": format!("https://www.dfc.gov/projects/{number}")
        }))
        .unwrap()
    }

    #[test]
    fn repeated_project_rows_collapse_into_one_record() {
        let records = group_rows(vec![
            row("9000011", "Kenya", 10_000_000.0),
            row("9000011", "Uganda", 5_000_000.0),
            row("9000011", "Kenya", 2_500_000.0),
        ]);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.loan_amount, Some(17_500_000.0));
        assert_eq!(record.loan_amount_usd, Some(17_500_000.0));
        assert_eq!(record.countries.as_deref(), Some("Kenya, Uganda"));
        assert_eq!(record.sectors.as_deref(), Some("Energy"));
        assert_eq!((record.year, record.month), (Some(2022), Some(6)));
    }

    #[test]
    fn blank_project_numbers_are_dropped() {
        let mut blank = row("9000012", "Kenya", 1.0);
        blank.project_number = "  ".to_string();
        assert!(group_rows(vec![blank]).is_empty());
    }
}
