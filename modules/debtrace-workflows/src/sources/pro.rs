//! Proparco. The project map offers an all-in-one list view, so the
//! seeder emits detail URLs directly.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::{ProjectScrapeStrategy, SeedStrategy};

use super::{clean_field, date_parts, parse_amount, parse_flexible_date, selector, text_of};

const BANK: &str = "PRO";
const SITE_BASE_URL: &str = "https://www.proparco.fr";
const LIST_URL: &str = "https://www.proparco.fr/en/carte-des-projets-list?page=all&query=%2A&view=start";

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

pub struct ProSeeder {
    fetcher: Arc<dyn PageFetcher>,
}

impl ProSeeder {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SeedStrategy for ProSeeder {
    async fn seed_urls(&self) -> Result<Vec<String>> {
        let list = self
            .fetcher
            .get(LIST_URL, FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        let urls = parse_list_links(&list.text());
        if urls.is_empty() {
            return Err(WorkflowError::scrape("project list page yielded no links"));
        }
        Ok(urls)
    }
}

fn parse_list_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut urls: Vec<String> = document
        .select(&selector("a"))
        .filter_map(|link| link.value().attr("href"))
        .filter(|href| href.contains("/en/carte-des-projets/"))
        .map(|href| {
            if href.starts_with("http") {
                href.to_string()
            } else {
                format!("{SITE_BASE_URL}{href}")
            }
        })
        .collect();
    urls.dedup();
    urls
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

pub struct ProProjectScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl ProProjectScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ProjectScrapeStrategy for ProProjectScraper {
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

    let labels: Vec<String> = document
        .select(&selector("div.project-sheet dt, ul.project-info li span.label"))
        .map(text_of)
        .collect();
    let values: Vec<String> = document
        .select(&selector("div.project-sheet dd, ul.project-info li span.value"))
        .map(text_of)
        .collect();
    if labels.is_empty() || labels.len() != values.len() {
        return Err(WorkflowError::scrape("project sheet missing from page"));
    }
    let field = |label: &str| -> Option<String> {
        labels
            .iter()
            .position(|key| key.eq_ignore_ascii_case(label))
            .and_then(|i| clean_field(&values[i]))
    };

    let amount = field("Funding amount")
        .or_else(|| field("Amount"))
        .as_deref()
        .and_then(parse_amount);
    let (year, month, day) = field("Signature date")
        .and_then(|raw| parse_flexible_date(&raw))
        .map(date_parts)
        .unwrap_or_else(|| {
            let year = field("Year").and_then(|raw| raw.parse().ok());
            (year, None, None)
        });

    Ok(vec![StagedProject {
        bank: BANK.to_string(),
        name,
        status: field("Status"),
        year,
        month,
        day,
        loan_amount: amount,
        loan_amount_currency: amount.map(|_| "EUR".to_string()),
        sectors: field("Sector").or_else(|| field("Field of intervention")),
        countries: field("Country").or_else(|| field("Localisation")),
        companies: field("Client"),
        url: url.to_string(),
        ..StagedProject::default()
    }])
}
