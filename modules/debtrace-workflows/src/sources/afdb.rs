//! African Development Bank (AfDB). The data portal's bulk export
//! yields every project code; detail pages are scraped individually.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::{ProjectScrapeStrategy, SeedStrategy};

use super::{clean_field, date_parts, parse_amount, parse_flexible_date, selector, text_of};

const BANK: &str = "AFDB";
const EXPORT_URL: &str = "https://projectsportal.afdb.org/dataportal/VProject/exportProjectList?_format=CSV&_name=&_file=dataPortal_project_list&reportName=dataPortal_project_list";

fn project_url(project_id: &str) -> String {
    format!("https://projectsportal.afdb.org/dataportal/VProject/show/{project_id}")
}

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

pub struct AfdbSeeder {
    fetcher: Arc<dyn PageFetcher>,
}

impl AfdbSeeder {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SeedStrategy for AfdbSeeder {
    async fn seed_urls(&self) -> Result<Vec<String>> {
        let export = self
            .fetcher
            .get(EXPORT_URL, FetchOptions::new().no_timeout())
            .await?
            .ensure_success()?;
        parse_project_codes(&export.body)
    }
}

/// The export's `Project Code` column keys every detail page.
fn parse_project_codes(body: &[u8]) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(body);
    let headers = reader
        .headers()
        .map_err(|e| WorkflowError::scrape(format!("unreadable project export header. {e}")))?
        .clone();
    let code_index = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("project code"))
        .ok_or_else(|| WorkflowError::scrape("project export is missing a Project Code column"))?;

    let mut urls = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| WorkflowError::scrape(format!("bad row in project export. {e}")))?;
        if let Some(code) = row.get(code_index).map(str::trim) {
            if !code.is_empty() {
                urls.push(project_url(code));
            }
        }
    }
    Ok(urls)
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

pub struct AfdbProjectScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl AfdbProjectScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ProjectScrapeStrategy for AfdbProjectScraper {
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
    let row_selector = selector("table tr");
    let cell_selector = selector("th, td");

    // Section tables across the page are all label/value rows.
    let mut fields: Vec<(String, String)> = Vec::new();
    for row in document.select(&row_selector) {
        let cells: Vec<String> = row.select(&cell_selector).map(text_of).collect();
        if cells.len() >= 2 {
            fields.push((cells[0].clone(), cells[1].clone()));
        }
    }
    if fields.is_empty() {
        return Err(WorkflowError::scrape("no detail tables found on project page"));
    }
    let field = |label: &str| -> Option<String> {
        fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(label))
            .and_then(|(_, value)| clean_field(value))
    };

    let name = field("Project Name").or_else(|| field("Project Title"));
    let number = field("Project Code");
    let status = field("Status");
    let countries = field("Country").map(|c| c.replace(" Multinational", ""));
    let sectors = field("Sector");
    let companies = field("Implementing Agency");
    let amount = field("Commitment")
        .or_else(|| field("Total Cost"))
        .as_deref()
        .and_then(parse_amount_uac);
    let (year, month, day) = field("Approval Date")
        .and_then(|raw| parse_flexible_date(&raw))
        .map(date_parts)
        .unwrap_or((None, None, None));

    Ok(vec![StagedProject {
        bank: BANK.to_string(),
        number,
        name,
        status,
        year,
        month,
        day,
        loan_amount: amount,
        loan_amount_currency: amount.map(|_| "XUA".to_string()),
        sectors,
        countries,
        companies,
        url: url.to_string(),
        ..StagedProject::default()
    }])
}

/// Commitments are quoted in UA (XUA) with an explicit unit suffix.
fn parse_amount_uac(raw: &str) -> Option<f64> {
    let amount = parse_amount(raw)?;
    if raw.contains("million") {
        Some(amount * 1e6)
    } else {
        Some(amount)
    }
}
