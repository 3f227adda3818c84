//! Asian Infrastructure Investment Bank (AIIB). A single manifest
//! file lists every project path; detail pages carry dt/dd summaries.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use serde::Deserialize;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::{ProjectScrapeStrategy, SeedStrategy};

use super::{clean_field, date_parts, parse_amount, parse_flexible_date, selector, text_of};

const BANK: &str = "AIIB";
const PROJECTS_BASE_URL: &str = "https://www.aiib.org";
const MANIFEST_URL: &str = "https://www.aiib.org/en/projects/list/.content/all-projects-data.js";

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    path: String,
}

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

pub struct AiibSeeder {
    fetcher: Arc<dyn PageFetcher>,
}

impl AiibSeeder {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SeedStrategy for AiibSeeder {
    async fn seed_urls(&self) -> Result<Vec<String>> {
        let manifest = self
            .fetcher
            .get(MANIFEST_URL, FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        let entries: Vec<ManifestEntry> = manifest.json().map_err(|_| {
            WorkflowError::scrape("project manifest is not the expected JSON array")
        })?;
        Ok(entries
            .into_iter()
            .map(|entry| format!("{PROJECTS_BASE_URL}{}", entry.path))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

pub struct AiibProjectScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl AiibProjectScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ProjectScrapeStrategy for AiibProjectScraper {
    async fn scrape_project_page(&self, url: &str) -> Result<Vec<StagedProject>> {
        let page = self
            .fetcher
            .get(url, FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        parse_project(&page.text(), url)
    }
}

fn parse_project(html: &str, url: &str) -> Result<Vec<StagedProject>> {
    let document = Html::parse_document(html);

    let name = document
        .select(&selector("h1"))
        .next()
        .map(text_of)
        .and_then(|t| clean_field(&t));

    // Summary block: dt labels paired with dd values.
    let labels: Vec<String> = document
        .select(&selector("dl.project-summary dt, dl dt"))
        .map(text_of)
        .collect();
    let values: Vec<String> = document
        .select(&selector("dl.project-summary dd, dl dd"))
        .map(text_of)
        .collect();
    if labels.is_empty() || labels.len() != values.len() {
        return Err(WorkflowError::scrape(
            "project summary list is missing or misaligned",
        ));
    }
    let field = |label: &str| -> Option<String> {
        labels
            .iter()
            .position(|key| key.eq_ignore_ascii_case(label))
            .and_then(|i| clean_field(&values[i]))
    };

    let amount = field("Financing Amount")
        .as_deref()
        .and_then(parse_amount)
        .map(|m| m * 1e6);
    let (year, month, day) = field("Approval Date")
        .and_then(|raw| parse_flexible_date(&raw))
        .map(date_parts)
        .unwrap_or((None, None, None));

    Ok(vec![StagedProject {
        bank: BANK.to_string(),
        number: field("Project Number"),
        name,
        status: field("Status"),
        year,
        month,
        day,
        loan_amount: amount,
        loan_amount_currency: amount.map(|_| "USD".to_string()),
        loan_amount_usd: amount,
        sectors: field("Sector"),
        countries: field("Member").or_else(|| field("Country")),
        companies: field("Borrower").or_else(|| field("Implementing Entity")),
        url: url.to_string(),
        ..StagedProject::default()
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_paths_become_project_urls() {
        let entries: Vec<ManifestEntry> = serde_json::from_str(
            r#"[{"path": "/en/projects/details/2021/approved/ruralroads.html"},
                {"path": "/en/projects/details/2022/proposed/metro.html"}]"#,
        )
        .unwrap();
        let urls: Vec<String> = entries
            .into_iter()
            .map(|e| format!("{PROJECTS_BASE_URL}{}", e.path))
            .collect();
        assert_eq!(
            urls[0],
            "https://www.aiib.org/en/projects/details/2021/approved/ruralroads.html"
        );
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn summary_list_parses_into_a_staged_record() {
        let html = r#"
            <h1>Metro Line Extension</h1>
            <dl class="project-summary">
              <dt>Project Number</dt><dd>000412</dd>
              <dt>Member</dt><dd>India</dd>
              <dt>Sector</dt><dd>Transport</dd>
              <dt>Status</dt><dd>Approved</dd>
              <dt>Approval Date</dt><dd>Oct 26, 2021</dd>
              <dt>Financing Amount</dt><dd>USD 356.67 million</dd>
            </dl>"#;
        let records = parse_project(html, "https://www.aiib.org/en/projects/details/metro.html")
            .unwrap();
        let record = &records[0];
        assert_eq!(record.name.as_deref(), Some("Metro Line Extension"));
        assert_eq!(record.countries.as_deref(), Some("India"));
        assert_eq!(record.status.as_deref(), Some("Approved"));
        assert!((record.loan_amount.unwrap() - 356.67e6).abs() < 1e-3);
        assert_eq!(record.year, Some(2021));
    }

    #[test]
    fn misaligned_summary_is_a_scrape_error() {
        let html = "<dl><dt>Member</dt></dl>";
        assert!(parse_project(html, "u").is_err());
    }
}
