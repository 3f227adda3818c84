//! Inter-American Development Bank (IDB). A paginated project search
//! feeds per-project detail pages.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::{ProjectScrapeStrategy, ResultsScrapeStrategy, SeedStrategy};

use super::{clean_field, parse_amount, selector, text_of};

const BANK: &str = "IDB";
const SITE_BASE_URL: &str = "https://www.iadb.org";

fn results_url(page: u32) -> String {
    format!("{SITE_BASE_URL}/en/projects-search?country=&sector=&status=&query=&page={page}")
}

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

pub struct IdbSeeder {
    fetcher: Arc<dyn PageFetcher>,
}

impl IdbSeeder {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SeedStrategy for IdbSeeder {
    async fn seed_urls(&self) -> Result<Vec<String>> {
        let first_page = self
            .fetcher
            .get(&results_url(0), FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        let last_page = parse_last_page(&first_page.text())?;
        Ok((0..=last_page).map(results_url).collect())
    }
}

fn parse_last_page(html: &str) -> Result<u32> {
    let document = Html::parse_document(html);
    document
        .select(&selector("li.pager__item--last a"))
        .next()
        .and_then(|link| link.value().attr("href"))
        .and_then(|href| href.rsplit("page=").next()?.parse::<u32>().ok())
        .ok_or_else(|| WorkflowError::scrape("last-page control not found on search page"))
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

pub struct IdbResultsScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl IdbResultsScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ResultsScrapeStrategy for IdbResultsScraper {
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
        .select(&selector("a"))
        .filter_map(|link| link.value().attr("href"))
        .filter(|href| href.contains("/en/project/"))
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

pub struct IdbProjectScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl IdbProjectScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ProjectScrapeStrategy for IdbProjectScraper {
    async fn scrape_project_page(&self, url: &str) -> Result<Vec<StagedProject>> {
        let page = self
            .fetcher
            .get(url, FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        parse_project(&page.text(), url)
    }
}

/// The project-information section lists label/value pairs; amounts
/// are quoted in USD. Approval dates appear as "October 26, 2021".
fn parse_project(html: &str, url: &str) -> Result<Vec<StagedProject>> {
    let document = Html::parse_document(html);

    let name = document
        .select(&selector("h1"))
        .next()
        .map(text_of)
        .and_then(|t| clean_field(&t));

    let mut fields: Vec<(String, String)> = Vec::new();
    for row in document.select(&selector("div.project-information div.field, table tr")) {
        let cells: Vec<String> = row
            .select(&selector("div.field__label, div.field__item, th, td"))
            .map(text_of)
            .collect();
        if cells.len() >= 2 {
            fields.push((cells[0].clone(), cells[1].clone()));
        }
    }
    if fields.is_empty() {
        return Err(WorkflowError::scrape("project information section missing"));
    }
    let field = |label: &str| -> Option<String> {
        fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(label))
            .and_then(|(_, value)| clean_field(value))
    };

    let amount = field("Amount")
        .or_else(|| field("Total Cost"))
        .as_deref()
        .and_then(parse_amount);
    let year = field("Approval Date").and_then(|raw| {
        raw.rsplit(|c: char| c == ' ' || c == '-')
            .next()
            .and_then(|tail| tail.parse::<i32>().ok())
    });

    Ok(vec![StagedProject {
        bank: BANK.to_string(),
        number: field("Project Number"),
        name,
        status: field("Project Status").or_else(|| field("Status")),
        year,
        loan_amount: amount,
        loan_amount_currency: amount.map(|_| "USD".to_string()),
        loan_amount_usd: amount,
        sectors: field("Sector"),
        countries: field("Country"),
        url: url.to_string(),
        ..StagedProject::default()
    }])
}
