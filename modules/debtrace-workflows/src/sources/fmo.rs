//! FMO (Dutch entrepreneurial development bank). The world map lists
//! projects page by page; detail pages carry a definition list.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::{ProjectScrapeStrategy, ResultsScrapeStrategy, SeedStrategy};

use super::{clean_field, date_parts, parse_amount, parse_flexible_date, selector, text_of};

const BANK: &str = "FMO";
const SITE_BASE_URL: &str = "https://www.fmo.nl";

fn results_url(page: u32) -> String {
    format!("{SITE_BASE_URL}/worldmap?page={page}")
}

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

pub struct FmoSeeder {
    fetcher: Arc<dyn PageFetcher>,
}

impl FmoSeeder {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SeedStrategy for FmoSeeder {
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
        .select(&selector("ul.pagination li a"))
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| href.rsplit("page=").next()?.parse::<u32>().ok())
        .max()
        .ok_or_else(|| WorkflowError::scrape("pagination not found on world map"))
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

pub struct FmoResultsScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl FmoResultsScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ResultsScrapeStrategy for FmoResultsScraper {
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
        .select(&selector("a.project-item, div.project-list a"))
        .filter_map(|link| link.value().attr("href"))
        .filter(|href| href.contains("/project-detail/"))
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

pub struct FmoProjectScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl FmoProjectScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ProjectScrapeStrategy for FmoProjectScraper {
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

    let labels: Vec<String> = document.select(&selector("dl dt")).map(text_of).collect();
    let values: Vec<String> = document.select(&selector("dl dd")).map(text_of).collect();
    if labels.is_empty() || labels.len() != values.len() {
        return Err(WorkflowError::scrape("project definition list missing"));
    }
    let field = |label: &str| -> Option<String> {
        labels
            .iter()
            .position(|key| key.eq_ignore_ascii_case(label))
            .and_then(|i| clean_field(&values[i]))
    };

    let amount_raw = field("Total FMO financing").or_else(|| field("Financing"));
    let amount = amount_raw.as_deref().and_then(parse_amount);
    let currency = amount_raw.as_deref().map(|raw| {
        if raw.contains("USD") {
            "USD".to_string()
        } else {
            "EUR".to_string()
        }
    });
    let (year, month, day) = field("Signing date")
        .and_then(|raw| parse_flexible_date(&raw))
        .map(date_parts)
        .unwrap_or((None, None, None));

    Ok(vec![StagedProject {
        bank: BANK.to_string(),
        name,
        status: field("Status"),
        year,
        month,
        day,
        loan_amount: amount,
        loan_amount_currency: currency.filter(|_| amount.is_some()),
        sectors: field("Sector"),
        countries: field("Country"),
        companies: field("Client").or_else(|| field("Customer")),
        url: url.to_string(),
        ..StagedProject::default()
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_hrefs_yield_the_last_page() {
        let html = r#"
            <ul class="pagination">
              <li><a href="/worldmap?page=0">1</a></li>
              <li><a href="/worldmap?page=1">2</a></li>
              <li><a href="/worldmap?page=41">Last</a></li>
            </ul>"#;
        assert_eq!(parse_last_page(html).unwrap(), 41);
    }

    #[test]
    fn only_project_detail_links_are_collected() {
        let html = r#"
            <div class="project-list">
              <a href="/project-detail/60123">Solar One</a>
              <a href="/about-fmo">About</a>
            </div>"#;
        assert_eq!(
            parse_result_links(html),
            vec!["https://www.fmo.nl/project-detail/60123"]
        );
    }

    #[test]
    fn detail_page_parses_with_usd_detection() {
        let html = r#"
            <h1>Solar One</h1>
            <dl>
              <dt>Status</dt><dd>Contracted</dd>
              <dt>Country</dt><dd>Nigeria</dd>
              <dt>Sector</dt><dd>Energy</dd>
              <dt>Total FMO financing</dt><dd>USD 15.00 MLN</dd>
              <dt>Signing date</dt><dd>2021-10-26</dd>
              <dt>Client</dt><dd>Solar One Ltd</dd>
            </dl>"#;
        let records = parse_project(html, "https://www.fmo.nl/project-detail/60123").unwrap();
        let record = &records[0];
        assert_eq!(record.loan_amount, Some(15.0));
        assert_eq!(record.loan_amount_currency.as_deref(), Some("USD"));
        assert_eq!(record.countries.as_deref(), Some("Nigeria"));
        assert_eq!(record.year, Some(2021));
    }
}
