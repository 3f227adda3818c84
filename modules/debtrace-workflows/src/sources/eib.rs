//! European Investment Bank (EIB). The page provider serves the loan
//! list as JSON pages; the seeder walks them all and emits one detail
//! URL per project.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use serde::Deserialize;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::{ProjectScrapeStrategy, SeedStrategy};

use super::{clean_field, date_parts, parse_amount, parse_flexible_date, selector, text_of};

const BANK: &str = "EIB";
const ITEMS_PER_PAGE: usize = 500;

fn list_url(page: usize) -> String {
    format!(
        "https://www.eib.org/page-provider/projects/list?pageNumber={page}&itemPerPage={ITEMS_PER_PAGE}&pageable=true&sortColumn=id"
    )
}

fn project_url(project_id: &str) -> String {
    format!("https://www.eib.org/en/projects/loans/all/{project_id}")
}

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    data: Vec<ListEntry>,
    #[serde(default, rename = "totalElements")]
    total_elements: usize,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    id: String,
}

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

pub struct EibSeeder {
    fetcher: Arc<dyn PageFetcher>,
}

impl EibSeeder {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SeedStrategy for EibSeeder {
    async fn seed_urls(&self) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        let mut page = 0usize;
        loop {
            let body = self
                .fetcher
                .get(&list_url(page), FetchOptions::browser_like())
                .await?
                .ensure_success()?;
            let list: ListPage = body
                .json()
                .map_err(|_| WorkflowError::scrape("loan list page is not the expected JSON"))?;
            if list.data.is_empty() {
                break;
            }
            urls.extend(list.data.iter().map(|entry| project_url(&entry.id)));
            page += 1;
            if urls.len() >= list.total_elements {
                break;
            }
        }
        Ok(urls)
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

pub struct EibProjectScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl EibProjectScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ProjectScrapeStrategy for EibProjectScraper {
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

    let mut fields: Vec<(String, String)> = Vec::new();
    for row in document.select(&selector("table tr, div.project-summary div.row")) {
        let cells: Vec<String> = row
            .select(&selector("th, td, span.label, span.value"))
            .map(text_of)
            .collect();
        if cells.len() >= 2 {
            fields.push((cells[0].clone(), cells[1].clone()));
        }
    }
    if fields.is_empty() {
        return Err(WorkflowError::scrape("loan detail fields not found"));
    }
    let field = |label: &str| -> Option<String> {
        fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(label))
            .and_then(|(_, value)| clean_field(value))
    };

    let amount = field("Proposed EIB finance")
        .or_else(|| field("Signed Amount"))
        .as_deref()
        .and_then(parse_amount);
    let (year, month, day) = field("Signature Date")
        .or_else(|| field("Approval Date"))
        .and_then(|raw| parse_flexible_date(&raw))
        .map(date_parts)
        .unwrap_or((None, None, None));

    Ok(vec![StagedProject {
        bank: BANK.to_string(),
        number: field("Reference"),
        name,
        status: field("Status"),
        year,
        month,
        day,
        loan_amount: amount,
        loan_amount_currency: amount.map(|_| "EUR".to_string()),
        sectors: field("Sector"),
        countries: field("Country").or_else(|| field("Countries")),
        companies: field("Promoter").or_else(|| field("Borrower")),
        url: url.to_string(),
        ..StagedProject::default()
    }])
}
