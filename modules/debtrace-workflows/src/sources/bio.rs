//! Belgian Investment Company for Developing Countries (BIO). Result
//! pages already carry part of each record, so this chain uses the
//! multi-scrape kind: cards yield partial records plus detail URLs,
//! and the detail pass fills in the financial fields.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;

use debtrace_common::StagedProject;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::{ProjectScrapeStrategy, ResultsMultiScrapeStrategy, SeedStrategy};

use super::{clean_field, date_parts, parse_amount, parse_flexible_date, selector, text_of};

const BANK: &str = "BIO";
const FIRST_PAGE: u32 = 1;

fn results_url(page: u32) -> String {
    format!("https://www.bio-invest.be/en/investments/p{page}?search=")
}

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

pub struct BioSeeder {
    fetcher: Arc<dyn PageFetcher>,
}

impl BioSeeder {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SeedStrategy for BioSeeder {
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

fn parse_last_page(html: &str) -> Result<u32> {
    let document = Html::parse_document(html);
    document
        .select(&selector("ul.pagination li a"))
        .filter_map(|link| text_of(link).parse::<u32>().ok())
        .max()
        .ok_or_else(|| WorkflowError::scrape("pagination not found on investments page"))
}

// ---------------------------------------------------------------------------
// Results (multi-scrape)
// ---------------------------------------------------------------------------

pub struct BioResultsScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl BioResultsScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ResultsMultiScrapeStrategy for BioResultsScraper {
    async fn scrape_results_page(
        &self,
        url: &str,
    ) -> Result<(Vec<String>, Vec<StagedProject>)> {
        let page = self
            .fetcher
            .get(url, FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        Ok(parse_investment_cards(&page.text()))
    }
}

/// Each card names the investment, its country, and its sector; the
/// card link leads to the detail page the partial pass completes.
fn parse_investment_cards(html: &str) -> (Vec<String>, Vec<StagedProject>) {
    let document = Html::parse_document(html);
    let mut urls = Vec::new();
    let mut partials = Vec::new();

    for card in document.select(&selector("div.investment-card, article.investment")) {
        let Some(href) = card
            .select(&selector("a"))
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("https://www.bio-invest.be{href}")
        };

        let name = card
            .select(&selector("h3"))
            .next()
            .map(text_of)
            .and_then(|t| clean_field(&t));
        let countries = card
            .select(&selector("span.country"))
            .next()
            .map(text_of)
            .and_then(|t| clean_field(&t));
        let sectors = card
            .select(&selector("span.sector"))
            .next()
            .map(text_of)
            .and_then(|t| clean_field(&t));

        partials.push(StagedProject {
            bank: BANK.to_string(),
            name,
            countries,
            sectors,
            url: url.clone(),
            ..StagedProject::default()
        });
        urls.push(url);
    }

    (urls, partials)
}

// ---------------------------------------------------------------------------
// Project (partial)
// ---------------------------------------------------------------------------

pub struct BioProjectScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl BioProjectScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ProjectScrapeStrategy for BioProjectScraper {
    async fn scrape_project_page(&self, url: &str) -> Result<Vec<StagedProject>> {
        let page = self
            .fetcher
            .get(url, FetchOptions::browser_like())
            .await?
            .ensure_success()?;
        Ok(parse_detail(&page.text(), url))
    }
}

/// The detail pass only fills what the cards could not: commitment,
/// signature date, and the field BIO labels "Investment". Missing
/// blocks produce an empty result, not an error.
fn parse_detail(html: &str, url: &str) -> Vec<StagedProject> {
    let document = Html::parse_document(html);

    let labels: Vec<String> = document.select(&selector("dl dt")).map(text_of).collect();
    let values: Vec<String> = document.select(&selector("dl dd")).map(text_of).collect();
    if labels.is_empty() || labels.len() != values.len() {
        return Vec::new();
    }
    let field = |label: &str| -> Option<String> {
        labels
            .iter()
            .position(|key| key.eq_ignore_ascii_case(label))
            .and_then(|i| clean_field(&values[i]))
    };

    let amount = field("Total BIO commitment")
        .or_else(|| field("Amount"))
        .as_deref()
        .and_then(parse_amount);
    let (year, month, day) = field("Signature date")
        .and_then(|raw| parse_flexible_date(&raw))
        .map(date_parts)
        .unwrap_or((None, None, None));

    vec![StagedProject {
        bank: BANK.to_string(),
        status: field("Status"),
        year,
        month,
        day,
        loan_amount: amount,
        loan_amount_currency: amount.map(|_| "EUR".to_string()),
        companies: field("Investment").or_else(|| field("Company")),
        url: url.to_string(),
        ..StagedProject::default()
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_FIXTURE: &str = r#"
        <ul class="pagination">
          <li><a href="/en/investments/p1?search=">1</a></li>
          <li><a href="/en/investments/p2?search=">2</a></li>
          <li><a href="/en/investments/p17?search=">17</a></li>
        </ul>
        <div class="investment-card">
          <a href="/en/investments/acme-microfinance">Acme Microfinance</a>
          <h3>Acme Microfinance</h3>
          <span class="country">Senegal</span>
          <span class="sector">Financial services</span>
        </div>
        <div class="investment-card">
          <a href="https://www.bio-invest.be/en/investments/agro-fund-ii">Agro Fund II</a>
          <h3>Agro Fund II</h3>
          <span class="country">Kenya</span>
          <span class="sector">Agribusiness</span>
        </div>"#;

    #[test]
    fn pagination_yields_the_last_page() {
        assert_eq!(parse_last_page(RESULTS_FIXTURE).unwrap(), 17);
    }

    #[test]
    fn cards_yield_urls_and_matching_partials() {
        let (urls, partials) = parse_investment_cards(RESULTS_FIXTURE);
        assert_eq!(urls.len(), 2);
        assert_eq!(partials.len(), 2);
        assert_eq!(
            urls[0],
            "https://www.bio-invest.be/en/investments/acme-microfinance"
        );
        assert_eq!(partials[0].name.as_deref(), Some("Acme Microfinance"));
        assert_eq!(partials[0].countries.as_deref(), Some("Senegal"));
        assert_eq!(partials[0].url, urls[0]);
        assert_eq!(partials[1].sectors.as_deref(), Some("Agribusiness"));
    }

    #[test]
    fn detail_page_fills_financial_fields() {
        let html = r#"
            <dl>
              <dt>Status</dt><dd>Active</dd>
              <dt>Total BIO commitment</dt><dd>EUR 7,500,000</dd>
              <dt>Signature date</dt><dd>26 Oct 2021</dd>
              <dt>Investment</dt><dd>Acme Microfinance SA</dd>
            </dl>"#;
        let records = parse_detail(html, "https://www.bio-invest.be/en/investments/acme");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.loan_amount, Some(7_500_000.0));
        assert_eq!(record.loan_amount_currency.as_deref(), Some("EUR"));
        assert_eq!(record.status.as_deref(), Some("Active"));
        assert_eq!(record.year, Some(2021));
    }

    #[test]
    fn detail_page_without_summary_yields_nothing() {
        assert!(parse_detail("<p>redesigned page</p>", "u").is_empty());
    }
}
