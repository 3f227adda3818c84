//! International Finance Corporation (IFC). The disclosure search API
//! pages through every enterprise project as JSON; detail pages are
//! scraped for the disclosed fields.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use serde::Deserialize;

use debtrace_common::StagedProject;
use debtrace_fetch::{ChromeRenderer, FetchOptions, PageFetcher, PageRenderer};

use crate::error::{Result, WorkflowError};
use crate::strategies::{ProjectScrapeStrategy, SeedStrategy};

use super::{clean_field, date_parts, parse_amount, parse_flexible_date, selector, text_of};

const BANK: &str = "IFC";
const SEARCH_URL: &str =
    "https://disclosuresservice.ifc.org/api/searchprovider/searchenterpriseprojects";
const DETAIL_BASE_URL: &str = "https://disclosures.ifc.org/project-detail";
const PAGE_SIZE: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde(default)]
    projects: Vec<SearchEntry>,
    #[serde(default)]
    total_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchEntry {
    project_number: String,
    #[serde(default)]
    url_slug: Option<String>,
}

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

pub struct IfcSeeder {
    fetcher: Arc<dyn PageFetcher>,
}

impl IfcSeeder {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SeedStrategy for IfcSeeder {
    async fn seed_urls(&self) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        let mut start = 0usize;
        loop {
            let payload = serde_json::json!({
                "searchTerm": "*",
                "start": start,
                "rows": PAGE_SIZE,
                "sortField": "disclosed_date",
                "sortOrder": "desc",
            });
            let body = self
                .fetcher
                .post_json(SEARCH_URL, &payload, FetchOptions::new())
                .await?
                .ensure_success()?;
            let page: SearchPage = body
                .json()
                .map_err(|_| WorkflowError::scrape("search response is not the expected JSON"))?;
            if page.projects.is_empty() {
                break;
            }
            urls.extend(page.projects.iter().map(detail_url));
            start += PAGE_SIZE;
            if start >= page.total_count {
                break;
            }
        }
        Ok(urls)
    }
}

fn detail_url(entry: &SearchEntry) -> String {
    match entry.url_slug.as_deref().filter(|s| !s.is_empty()) {
        Some(slug) => format!("{DETAIL_BASE_URL}/SPI/{}/{slug}", entry.project_number),
        None => format!("{DETAIL_BASE_URL}/SPI/{}", entry.project_number),
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// Disclosure pages ship as a JavaScript shell; when the static fetch
/// comes back without the field list, a per-call headless render
/// supplies the assembled DOM.
pub struct IfcProjectScraper {
    fetcher: Arc<dyn PageFetcher>,
    renderer: Arc<dyn PageRenderer>,
}

impl IfcProjectScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            renderer: Arc::new(ChromeRenderer::from_env()),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }
}

#[async_trait]
impl ProjectScrapeStrategy for IfcProjectScraper {
    async fn scrape_project_page(&self, url: &str) -> Result<Vec<StagedProject>> {
        let page = self
            .fetcher
            .get(url, FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        match parse_project(&page.text(), url) {
            Ok(records) => Ok(records),
            Err(_) => {
                let rendered = self.renderer.render(url).await?;
                parse_project(&rendered, url)
            }
        }
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
        .select(&selector("div.project-details dt, table th"))
        .map(text_of)
        .collect();
    let values: Vec<String> = document
        .select(&selector("div.project-details dd, table td"))
        .map(text_of)
        .collect();
    if labels.is_empty() || labels.len() != values.len() {
        return Err(WorkflowError::scrape("disclosure fields missing from page"));
    }
    let field = |label: &str| -> Option<String> {
        labels
            .iter()
            .position(|key| key.eq_ignore_ascii_case(label))
            .and_then(|i| clean_field(&values[i]))
    };

    let amount = field("Total Investment")
        .or_else(|| field("IFC investment as approved by Board"))
        .as_deref()
        .and_then(parse_amount)
        .map(|m| m * 1e6);
    let (year, month, day) = field("Disclosed Date")
        .or_else(|| field("Approval Date"))
        .and_then(|raw| parse_flexible_date(&raw))
        .map(date_parts)
        .unwrap_or((None, None, None));

    Ok(vec![StagedProject {
        bank: BANK.to_string(),
        number: field("Project Number"),
        name,
        status: field("Status").or_else(|| field("Environmental Category")),
        year,
        month,
        day,
        loan_amount: amount,
        loan_amount_currency: amount.map(|_| "USD".to_string()),
        loan_amount_usd: amount,
        sectors: field("Sector").or_else(|| field("Industry")),
        countries: field("Country"),
        companies: field("Company Name"),
        url: url.to_string(),
        ..StagedProject::default()
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFetcher;

    struct CannedRenderer {
        html: String,
    }

    #[async_trait]
    impl PageRenderer for CannedRenderer {
        async fn render(&self, _url: &str) -> debtrace_fetch::Result<String> {
            Ok(self.html.clone())
        }
    }

    #[test]
    fn search_entries_map_to_detail_urls() {
        let page: SearchPage = serde_json::from_str(
            r#"{"projects": [
                {"projectNumber": "41234", "urlSlug": "green-bond-fund"},
                {"projectNumber": "41235"}
            ], "totalCount": 2}"#,
        )
        .unwrap();
        assert_eq!(
            detail_url(&page.projects[0]),
            "https://disclosures.ifc.org/project-detail/SPI/41234/green-bond-fund"
        );
        assert_eq!(
            detail_url(&page.projects[1]),
            "https://disclosures.ifc.org/project-detail/SPI/41235"
        );
    }

    #[test]
    fn disclosure_page_parses_into_a_staged_record() {
        let html = r#"
            <h1>Green Bond Fund</h1>
            <div class="project-details">
              <dt>Project Number</dt><dd>41234</dd>
              <dt>Status</dt><dd>Active</dd>
              <dt>Country</dt><dd>Colombia</dd>
              <dt>Industry</dt><dd>Financial Institutions</dd>
              <dt>Company Name</dt><dd>Bancoldex</dd>
              <dt>Disclosed Date</dt><dd>26 Oct 2021</dd>
              <dt>Total Investment</dt><dd>US$ 100 million</dd>
            </div>"#;
        let records = parse_project(
            html,
            "https://disclosures.ifc.org/project-detail/SPI/41234/green-bond-fund",
        )
        .unwrap();
        let record = &records[0];
        assert_eq!(record.number.as_deref(), Some("41234"));
        assert_eq!(record.loan_amount, Some(100e6));
        assert_eq!(record.countries.as_deref(), Some("Colombia"));
        assert_eq!(record.companies.as_deref(), Some("Bancoldex"));
        assert_eq!(record.year, Some(2021));
    }

    #[tokio::test]
    async fn shell_page_falls_back_to_the_headless_render() {
        let url = "https://disclosures.ifc.org/project-detail/SPI/41234/green-bond-fund";
        let shell = r#"<html><body><div id="app"></div></body></html>"#;
        let rendered = r#"
            <h1>Green Bond Fund</h1>
            <div class="project-details">
              <dt>Project Number</dt><dd>41234</dd>
              <dt>Country</dt><dd>Colombia</dd>
            </div>"#;

        let scraper = IfcProjectScraper::new(Arc::new(MockFetcher::new().on_page(url, shell)))
            .with_renderer(Arc::new(CannedRenderer {
                html: rendered.to_string(),
            }));

        let records = scraper.scrape_project_page(url).await.unwrap();
        assert_eq!(records[0].number.as_deref(), Some("41234"));
        assert_eq!(records[0].countries.as_deref(), Some("Colombia"));
    }
}
