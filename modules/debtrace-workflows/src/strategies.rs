//! Strategy contracts for the six workflow kinds (plus the filing
//! variants), one abstract operation each. The shared pre/post
//! choreography (task stamping, persistence, fan-out, failure
//! recording) lives in [`crate::engine`] and is written once.

use async_trait::async_trait;

use debtrace_common::{StagedInvestment, StagedProject};

use crate::error::Result;

/// Generates the initial set of URLs for a source. Runs without a URL
/// of its own (starter tasks carry an empty one).
#[async_trait]
pub trait SeedStrategy: Send + Sync {
    async fn seed_urls(&self) -> Result<Vec<String>>;
}

/// Scrapes a search-results page for detail-page URLs.
#[async_trait]
pub trait ResultsScrapeStrategy: Send + Sync {
    async fn scrape_results_page(&self, url: &str) -> Result<Vec<String>>;
}

/// Scrapes a search-results page that yields both partial records and
/// detail-page URLs.
#[async_trait]
pub trait ResultsMultiScrapeStrategy: Send + Sync {
    async fn scrape_results_page(&self, url: &str)
        -> Result<(Vec<String>, Vec<StagedProject>)>;
}

/// Scrapes one project detail page. Returns zero or more records; a
/// page that parses but holds no data is not an error.
#[async_trait]
pub trait ProjectScrapeStrategy: Send + Sync {
    async fn scrape_project_page(&self, url: &str) -> Result<Vec<StagedProject>>;
}

/// Downloads a source's full project table and emits cleaned rows.
#[async_trait]
pub trait DownloadStrategy: Send + Sync {
    async fn fetch_projects(&self) -> Result<Vec<StagedProject>>;
}

/// Parses a filer's submission history into recent filing-page URLs
/// (parseable info tables) and archived-payload URLs.
#[async_trait]
pub trait FilingHistoryStrategy: Send + Sync {
    async fn scrape_filing_history(&self, url: &str) -> Result<(Vec<String>, Vec<String>)>;
}

/// Walks an archived-submissions JSON payload into filing-page URLs.
#[async_trait]
pub trait FilingArchiveStrategy: Send + Sync {
    async fn scrape_archived_submissions(&self, url: &str) -> Result<Vec<String>>;
}

/// Scrapes one filing's information table into staged holdings.
#[async_trait]
pub trait FilingScrapeStrategy: Send + Sync {
    async fn scrape_investments(&self, url: &str) -> Result<Vec<StagedInvestment>>;
}
