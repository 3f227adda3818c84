//! Asian Development Bank (ADB). Search result pages are scraped for
//! project URLs; the print view of each project page carries the
//! detail tables.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::{ProjectScrapeStrategy, ResultsScrapeStrategy, SeedStrategy};

use super::{clean_field, date_parts, parse_amount, parse_flexible_date, selector, text_of};

const BANK: &str = "ADB";
const FIRST_PAGE: u32 = 0;
const PRINT_BASE_URL: &str = "https://www.adb.org/print";

fn results_url(page: u32) -> String {
    format!("https://www.adb.org/projects?page={page}")
}

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

pub struct AdbSeeder {
    fetcher: Arc<dyn PageFetcher>,
}

impl AdbSeeder {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SeedStrategy for AdbSeeder {
    async fn seed_urls(&self) -> Result<Vec<String>> {
        let first_page = self
            .fetcher
            .get(&results_url(FIRST_PAGE), FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        let last_page = parse_last_page(&first_page.text())?;
        Ok((FIRST_PAGE..=last_page).map(results_url).collect())
    }
}

/// Reads the page number out of the pager's last-page link.
fn parse_last_page(html: &str) -> Result<u32> {
    let document = Html::parse_document(html);
    let link = document
        .select(&selector("li.pager-last a"))
        .next()
        .ok_or_else(|| WorkflowError::scrape("last-page control not found on results page"))?;
    let href = link
        .value()
        .attr("href")
        .ok_or_else(|| WorkflowError::scrape("last-page link has no href"))?;
    href.rsplit('=')
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| WorkflowError::scrape(format!("unparseable last-page href \"{href}\"")))
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

pub struct AdbResultsScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl AdbResultsScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ResultsScrapeStrategy for AdbResultsScraper {
    async fn scrape_results_page(&self, url: &str) -> Result<Vec<String>> {
        let page = self
            .fetcher
            .get(url, FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        Ok(parse_result_links(&page.text()))
    }
}

/// Project links sit in the result list; each becomes a print-view URL.
fn parse_result_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&selector("div.list div.item a"))
        .filter_map(|link| link.value().attr("href"))
        .map(|href| format!("{PRINT_BASE_URL}{href}/main"))
        .collect()
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

pub struct AdbProjectScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl AdbProjectScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ProjectScrapeStrategy for AdbProjectScraper {
    async fn scrape_project_page(&self, url: &str) -> Result<Vec<StagedProject>> {
        let page = self
            .fetcher
            .get(url, FetchOptions::browser_like().delay(1, 4))
            .await?
            .ensure_success()?;
        parse_project(&page.text(), url)
    }
}

fn parse_project(html: &str, url: &str) -> Result<Vec<StagedProject>> {
    let document = Html::parse_document(html);

    // The first table holds label/value rows of project background.
    let table = document
        .select(&selector("table"))
        .next()
        .ok_or_else(|| WorkflowError::scrape("project detail table not found"))?;

    let row_selector = selector("tr");
    let cell_selector = selector("th, td");
    let mut fields: Vec<(String, String)> = Vec::new();
    for row in table.select(&row_selector) {
        let cells: Vec<String> = row.select(&cell_selector).map(text_of).collect();
        if cells.len() >= 2 {
            fields.push((cells[0].clone(), cells[1].clone()));
        }
    }
    let field = |label: &str| -> Option<String> {
        fields
            .iter()
            .find(|(key, _)| key == label)
            .and_then(|(_, value)| clean_field(value))
    };

    let name = field("Project Name");
    let number = field("Project Number");
    let status = field("Project Status");
    let countries = field("Country / Economy")
        .or_else(|| field("Country"))
        .map(normalize_country_list);
    let sectors = parse_sectors(&document);
    let companies = parse_companies(&document);
    let total_amount = parse_financing(&document);
    let (year, month, day) = field("Approval")
        .or_else(|| field("Approval Date"))
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
        loan_amount: total_amount,
        loan_amount_currency: total_amount.map(|_| "USD".to_string()),
        loan_amount_usd: total_amount,
        sectors,
        countries,
        companies,
        url: url.replace("/print", "").replace("/main", ""),
        ..StagedProject::default()
    }])
}

/// ADB lists multi-country projects one per line, sometimes in formal
/// "Republic of, X" order that gets flipped back here.
fn normalize_country_list(raw: String) -> String {
    raw.split('\n')
        .flat_map(|line| line.split("  "))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(',').map(str::trim).collect();
            if parts.len() == 2 {
                format!("{} {}", parts[1], parts[0])
            } else {
                entry.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_sectors(document: &Html) -> Option<String> {
    let sectors: Vec<String> = document
        .select(&selector("strong.sector"))
        .map(text_of)
        .filter(|s| !s.is_empty())
        .collect();
    if sectors.is_empty() {
        None
    } else {
        Some(sectors.join(", "))
    }
}

fn parse_companies(document: &Html) -> Option<String> {
    let companies: Vec<String> = document
        .select(&selector("span.address-company"))
        .map(text_of)
        .filter(|s| !s.is_empty())
        .collect();
    if companies.is_empty() {
        None
    } else {
        Some(companies.join(", "))
    }
}

/// Sums ADB financing across loan and technical-assistance tables.
/// Loan rows are labelled "ADB" with amounts in millions USD.
fn parse_financing(document: &Html) -> Option<f64> {
    let row_selector = selector("tr");
    let cell_selector = selector("th, td");
    let mut total = 0f64;
    let mut found = false;

    for table in document.select(&selector("table.financing")) {
        let table_text = text_of(table);
        let is_technical_assistance = table_text.contains("Financing Plan/TA Utilization");

        for row in table.select(&row_selector) {
            let cells: Vec<String> = row.select(&cell_selector).map(text_of).collect();
            if cells.len() < 2 {
                continue;
            }
            if is_technical_assistance {
                if cells[0].contains("Total") {
                    if let Some(amount) = parse_amount(&cells[1]) {
                        total += amount;
                        found = true;
                    }
                }
            } else if cells[0] == "ADB" {
                if let Some(amount) = parse_amount(&cells[1]) {
                    total += amount * 1e6;
                    found = true;
                }
            }
        }
    }

    found.then_some(total)
}
