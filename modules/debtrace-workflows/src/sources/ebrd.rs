//! European Bank for Reconstruction and Development (EBRD). Project
//! summary documents are indexed by a paginated Solr search.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::{ProjectScrapeStrategy, ResultsScrapeStrategy, SeedStrategy};

use super::{clean_field, date_parts, parse_amount, parse_flexible_date, selector, text_of};

const BANK: &str = "EBRD";
const SITE_BASE_URL: &str = "https://www.ebrd.com";
const RESULTS_PER_PAGE: u32 = 10;

fn results_url(page: u32) -> String {
    format!(
        "{SITE_BASE_URL}/cs/Satellite?c=Page&cid=1395238314964&d=&pagename=EBRD/Page/SolrSearchAndFilterPSD&page={page}&safSortBy=PublicationDate_sort&safSortOrder=descending"
    )
}

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

pub struct EbrdSeeder {
    fetcher: Arc<dyn PageFetcher>,
}

impl EbrdSeeder {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SeedStrategy for EbrdSeeder {
    async fn seed_urls(&self) -> Result<Vec<String>> {
        let first_page = self
            .fetcher
            .get(&results_url(1), FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        let total = parse_result_count(&first_page.text())?;
        let last_page = total.div_ceil(RESULTS_PER_PAGE).max(1);
        Ok((1..=last_page).map(results_url).collect())
    }
}

/// The search header reads like "Showing 1-10 of 5,432 results".
fn parse_result_count(html: &str) -> Result<u32> {
    let document = Html::parse_document(html);
    let header = document
        .select(&selector("span.search-count, div.search-count"))
        .next()
        .map(text_of)
        .ok_or_else(|| WorkflowError::scrape("result count header not found"))?;
    header
        .split("of")
        .nth(1)
        .and_then(|tail| {
            let digits: String = tail.chars().filter(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
        .ok_or_else(|| WorkflowError::scrape(format!("unparseable result count \"{header}\"")))
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

pub struct EbrdResultsScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl EbrdResultsScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ResultsScrapeStrategy for EbrdResultsScraper {
    async fn scrape_results_page(&self, url: &str) -> Result<Vec<String>> {
        let page = self
            .fetcher
            .get(url, FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        Ok(parse_result_links(&page.text()))
    }
}

fn parse_result_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&selector("div.search-results a, ul.search-results a"))
        .filter_map(|link| link.value().attr("href"))
        .filter(|href| href.contains("/work-with-us/projects/psd/"))
        .map(|href| {
            if href.starts_with("http") {
                href.to_string()
            } else {
                format!("{SITE_BASE_URL}{href}")
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

pub struct EbrdProjectScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl EbrdProjectScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ProjectScrapeStrategy for EbrdProjectScraper {
    async fn scrape_project_page(&self, url: &str) -> Result<Vec<StagedProject>> {
        let page = self
            .fetcher
            .get(url, FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        parse_project(&page.text(), url)
    }
}

/// Project summary documents lead with a memo table of label/value
/// rows; the financing line is quoted in EUR.
fn parse_project(html: &str, url: &str) -> Result<Vec<StagedProject>> {
    let document = Html::parse_document(html);

    let name = document
        .select(&selector("h1"))
        .next()
        .map(text_of)
        .and_then(|t| clean_field(&t));

    let mut fields: Vec<(String, String)> = Vec::new();
    for row in document.select(&selector("table tr")) {
        let cells: Vec<String> = row.select(&selector("th, td")).map(text_of).collect();
        if cells.len() >= 2 {
            fields.push((cells[0].clone(), cells[1].clone()));
        }
    }
    if fields.is_empty() {
        return Err(WorkflowError::scrape("summary table not found on PSD page"));
    }
    let field = |label: &str| -> Option<String> {
        fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(label))
            .and_then(|(_, value)| clean_field(value))
    };

    let amount = field("EBRD Finance Summary")
        .or_else(|| field("Total Project Value"))
        .as_deref()
        .and_then(parse_amount);
    let (year, month, day) = field("Approval Date")
        .or_else(|| field("Board Date"))
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
        loan_amount_currency: amount.map(|_| "EUR".to_string()),
        sectors: field("Business Sector").or_else(|| field("Sector")),
        countries: field("Location").or_else(|| field("Country")),
        companies: field("Client Information").or_else(|| field("Client")),
        url: url.to_string(),
        ..StagedProject::default()
    }])
}
