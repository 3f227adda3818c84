//! SEC Form 13F. A filer's submission history routes to one of two
//! follow-ups at runtime: filings from 2013 onward have parseable
//! information tables (filing-scrape), older history lives in archived
//! JSON payloads (filing-archive). The scrape itself walks a filing's
//! home page to its information table and stages one row per holding.

use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::Deserialize;

use debtrace_common::StagedInvestment;
use debtrace_fetch::{FetchOptions, PageFetcher};

use crate::error::{Result, WorkflowError};
use crate::strategies::{
    FilingArchiveStrategy, FilingHistoryStrategy, FilingScrapeStrategy, SeedStrategy,
};

use super::{clean_field, parse_digits, selector, text_of};

const FORM_TYPE: &str = "13F-HR";
/// Information tables filed before this year exist only as raw text.
const FIRST_PARSEABLE_YEAR: i32 = 2013;
const SEC_BASE_URL: &str = "https://www.sec.gov";

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("valid date regex"));
static CIK_IN_ARCHIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CIK(\d{10})").expect("valid CIK regex"));
static CIK_IN_FILING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/data/(\d+)/").expect("valid filing CIK regex"));

fn submissions_url(cik: &str) -> String {
    format!("https://data.sec.gov/submissions/CIK{cik:0>10}.json")
}

fn archive_url(file_name: &str) -> String {
    format!("https://data.sec.gov/submissions/{file_name}")
}

fn filing_url(cik: &str, accession_number: &str) -> String {
    format!(
        "{SEC_BASE_URL}/Archives/edgar/data/{cik}/{}/{accession_number}-index.htm",
        accession_number.replace('-', "")
    )
}

/// EDGAR requires a declared identity; rotating browser agents would
/// get the pipeline blocked.
fn sec_options(host: &str) -> FetchOptions {
    FetchOptions::new()
        .delay(1, 10)
        .header("User-Agent", "debtrace data pipeline admin@debtrace.dev")
        .header("Accept-Encoding", "gzip, deflate")
        .header("Host", host)
}

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FilerEntry {
    cik: String,
}

/// Emits one submission-history URL per configured filer.
pub struct SecSeeder {
    companies_path: String,
}

impl SecSeeder {
    pub fn new(config_dir: &str) -> Self {
        Self {
            companies_path: format!("{config_dir}/form13f_companies.json"),
        }
    }
}

#[async_trait]
impl SeedStrategy for SecSeeder {
    async fn seed_urls(&self) -> Result<Vec<String>> {
        let raw = std::fs::read_to_string(&self.companies_path).map_err(|e| {
            WorkflowError::scrape(format!(
                "failed to load filer list from \"{}\". {e}",
                self.companies_path
            ))
        })?;
        let filers: Vec<FilerEntry> = serde_json::from_str(&raw).map_err(|e| {
            WorkflowError::scrape(format!("filer list is not the expected JSON. {e}"))
        })?;
        Ok(filers.iter().map(|f| submissions_url(&f.cik)).collect())
    }
}

// ---------------------------------------------------------------------------
// Filing history
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmissionHistory {
    cik: String,
    filings: HistoryFilings,
}

#[derive(Debug, Deserialize)]
struct HistoryFilings {
    #[serde(default)]
    files: Vec<ArchiveFile>,
    recent: RecentFilings,
}

#[derive(Debug, Deserialize)]
struct ArchiveFile {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RecentFilings {
    form: Vec<String>,
    #[serde(rename = "accessionNumber")]
    accession_number: Vec<String>,
    #[serde(rename = "filingDate")]
    filing_date: Vec<String>,
}

pub struct SecFilingHistory {
    fetcher: Arc<dyn PageFetcher>,
}

impl SecFilingHistory {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl FilingHistoryStrategy for SecFilingHistory {
    async fn scrape_filing_history(&self, url: &str) -> Result<(Vec<String>, Vec<String>)> {
        let body = self
            .fetcher
            .get(url, sec_options("data.sec.gov"))
            .await?
            .ensure_success()?;
        parse_filing_history(&body.text())
    }
}

/// Classifies the recent list and decides whether the archived
/// payloads are worth walking: once an old-format information table
/// shows up among the recent filings, everything archived predates the
/// parseable era and is skipped.
fn parse_filing_history(json: &str) -> Result<(Vec<String>, Vec<String>)> {
    let history: SubmissionHistory = serde_json::from_str(json)
        .map_err(|e| WorkflowError::scrape(format!("submission history JSON is malformed. {e}")))?;
    let recent = &history.filings.recent;
    if recent.form.len() != recent.accession_number.len()
        || recent.form.len() != recent.filing_date.len()
    {
        return Err(WorkflowError::scrape(
            "submission history columns are misaligned",
        ));
    }

    let mut filing_urls = Vec::new();
    let mut encountered_old_format = false;
    for i in 0..recent.form.len() {
        if recent.form[i] != FORM_TYPE {
            continue;
        }
        let year: Option<i32> = recent.filing_date[i].get(..4).and_then(|y| y.parse().ok());
        if matches!(year, Some(y) if y < FIRST_PARSEABLE_YEAR) {
            encountered_old_format = true;
            continue;
        }
        filing_urls.push(filing_url(&history.cik, &recent.accession_number[i]));
    }

    let archive_urls = if encountered_old_format {
        Vec::new()
    } else {
        history
            .filings
            .files
            .iter()
            .map(|f| archive_url(&f.name))
            .collect()
    };

    Ok((filing_urls, archive_urls))
}

// ---------------------------------------------------------------------------
// Filing archive
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ArchivedSubmissions {
    form: Vec<String>,
    #[serde(rename = "accessionNumber")]
    accession_number: Vec<String>,
}

pub struct SecFilingArchive {
    fetcher: Arc<dyn PageFetcher>,
}

impl SecFilingArchive {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl FilingArchiveStrategy for SecFilingArchive {
    async fn scrape_archived_submissions(&self, url: &str) -> Result<Vec<String>> {
        let body = self
            .fetcher
            .get(url, sec_options("data.sec.gov"))
            .await?
            .ensure_success()?;
        parse_archived_submissions(&body.text(), url)
    }
}

fn parse_archived_submissions(json: &str, url: &str) -> Result<Vec<String>> {
    let archived: ArchivedSubmissions = serde_json::from_str(json)
        .map_err(|e| WorkflowError::scrape(format!("archived submissions JSON is malformed. {e}")))?;
    let cik = CIK_IN_ARCHIVE_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_start_matches('0').to_string())
        .ok_or_else(|| WorkflowError::scrape(format!("no CIK found in archive URL \"{url}\"")))?;

    Ok(archived
        .form
        .iter()
        .zip(&archived.accession_number)
        .filter(|(form, _)| form.as_str() == FORM_TYPE)
        .map(|(_, accession)| filing_url(&cik, accession))
        .collect())
}

// ---------------------------------------------------------------------------
// Filing scrape
// ---------------------------------------------------------------------------

pub struct SecFilingScraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl SecFilingScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl FilingScrapeStrategy for SecFilingScraper {
    async fn scrape_investments(&self, url: &str) -> Result<Vec<StagedInvestment>> {
        let (cik, accession_number) = parse_filing_url(url)?;

        let home_page = self
            .fetcher
            .get(url, sec_options("www.sec.gov"))
            .await?
            .ensure_success()?;
        let (metadata, info_table_url) = parse_form_home_page(&home_page.text())?;

        // A filing without an HTML information table stages nothing.
        let Some(info_table_url) = info_table_url else {
            return Ok(Vec::new());
        };

        let table_page = self
            .fetcher
            .get(&info_table_url, sec_options("www.sec.gov"))
            .await?
            .ensure_success()?;
        parse_info_table(&table_page.text(), &metadata, &cik, &accession_number, url)
    }
}

/// Filing home-page metadata needed on every staged row.
#[derive(Debug, Default, Clone)]
struct FilingMetadata {
    form_name: Option<String>,
    company_name: Option<String>,
    report_period: Option<String>,
    filing_date: Option<String>,
    acceptance_date: Option<String>,
    effective_date: Option<String>,
}

fn parse_filing_url(url: &str) -> Result<(String, String)> {
    let cik = CIK_IN_FILING_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| format!("{:0>10}", m.as_str()))
        .ok_or_else(|| WorkflowError::scrape(format!("no CIK found in filing URL \"{url}\"")))?;
    let accession_number = url
        .rsplit('/')
        .next()
        .map(|tail| tail.trim_end_matches("-index.htm").to_string())
        .filter(|acc| !acc.is_empty())
        .ok_or_else(|| WorkflowError::scrape(format!("no accession number in URL \"{url}\"")))?;
    Ok((cik, accession_number))
}

fn parse_form_home_page(html: &str) -> Result<(FilingMetadata, Option<String>)> {
    let document = Html::parse_document(html);
    let mut metadata = FilingMetadata::default();

    let form_div = document
        .select(&selector("div#formDiv"))
        .next()
        .ok_or_else(|| WorkflowError::scrape("filing page has no form summary"))?;
    metadata.form_name = form_div
        .select(&selector("strong"))
        .next()
        .map(text_of)
        .and_then(|t| clean_field(&t));

    // Each infoHead label's value sits in the next sibling div.
    for head in form_div.select(&selector("div.infoHead")) {
        let label = text_of(head);
        let value = head
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .next()
            .map(|el| text_of(el));
        let value = value.as_deref().and_then(format_date);
        match label.as_str() {
            "Period of Report" => metadata.report_period = value,
            "Filing Date" => metadata.filing_date = value,
            "Accepted" => metadata.acceptance_date = value,
            "Effectiveness Date" => metadata.effective_date = value,
            _ => {}
        }
    }

    metadata.company_name = document
        .select(&selector("span.companyName"))
        .next()
        .map(text_of)
        .and_then(|name| correct_company_name(&name));

    // The document table names the information table and links its
    // HTML rendering.
    let mut info_table_url = None;
    for row in document.select(&selector("table.tableFile tr")) {
        let cells: Vec<ElementRef<'_>> = row.select(&selector("td")).collect();
        let is_info_table = cells.iter().any(|cell| text_of(*cell) == "INFORMATION TABLE");
        if !is_info_table {
            continue;
        }
        let link = cells.iter().find_map(|cell| {
            cell.select(&selector("a"))
                .find_map(|a| a.value().attr("href").filter(|href| href.contains("html")))
        });
        if let Some(href) = link {
            info_table_url = Some(format!("{SEC_BASE_URL}{href}"));
            break;
        }
    }

    Ok((metadata, info_table_url))
}

fn parse_info_table(
    html: &str,
    metadata: &FilingMetadata,
    cik: &str,
    accession_number: &str,
    form_url: &str,
) -> Result<Vec<StagedInvestment>> {
    let document = Html::parse_document(html);
    let table = document
        .select(&selector(r#"table[summary="Form 13F-NT Header Information"]"#))
        .next()
        .ok_or_else(|| WorkflowError::scrape("information table not found"))?;

    const HEADER_ROWS: usize = 3;
    let mut investments = Vec::new();
    for row in table.select(&selector("tr")).skip(HEADER_ROWS) {
        let cells: Vec<String> = row.select(&selector("td")).map(text_of).collect();
        if cells.len() < 12 {
            continue;
        }
        investments.push(StagedInvestment {
            company_cik: cik.to_string(),
            company_name: metadata.company_name.clone(),
            form_name: metadata.form_name.clone(),
            form_accession_number: accession_number.to_string(),
            form_report_period: metadata.report_period.clone(),
            form_filing_date: metadata.filing_date.clone(),
            form_acceptance_date: metadata.acceptance_date.clone(),
            form_effective_date: metadata.effective_date.clone(),
            form_url: form_url.to_string(),
            stock_issuer_name: cells[0].clone(),
            stock_title_class: replace_null(&cells[1]),
            stock_cusip: cells[2].clone(),
            stock_value_x1000: parse_digits(&cells[3])?,
            stock_shares_prn_amt: parse_digits(&cells[4])?,
            stock_sh_prn: replace_null(&cells[5]),
            stock_put_call: replace_null(&cells[6]),
            stock_investment_discretion: replace_null(&cells[7]),
            stock_manager: replace_null(&cells[8]).unwrap_or_default(),
            stock_voting_auth_sole: parse_digits(&cells[9])?,
            stock_voting_auth_shared: parse_digits(&cells[10])?,
            stock_voting_auth_none: parse_digits(&cells[11])?,
            ..StagedInvestment::default()
        });
    }
    Ok(investments)
}

/// Reduces a datetime-ish string to its `yyyy-mm-dd` core.
fn format_date(raw: &str) -> Option<String> {
    DATE_RE.find(raw).map(|m| m.as_str().to_string())
}

/// Blank cells arrive as empty strings or non-breaking spaces.
fn replace_null(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "\u{a0}" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Strips the "(Filer)" suffix EDGAR appends to the company name.
fn correct_company_name(raw: &str) -> Option<String> {
    let cleaned = raw.trim();
    match cleaned.rfind(" (Filer)") {
        Some(end) => clean_field(&cleaned[..end]),
        None => clean_field(cleaned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_urls_zero_pad_the_cik() {
        assert_eq!(
            submissions_url("1067983"),
            "https://data.sec.gov/submissions/CIK0001067983.json"
        );
    }

    #[test]
    fn history_splits_recent_and_archived_filings() {
        // Two parseable 13F-HR filings, one foreign form, plus three
        // archived payloads.
        let json = r#"{
            "cik": "1067983",
            "filings": {
                "files": [
                    {"name": "CIK0001067983-submissions-001.json"},
                    {"name": "CIK0001067983-submissions-002.json"},
                    {"name": "CIK0001067983-submissions-003.json"}
                ],
                "recent": {
                    "form": ["13F-HR", "8-K", "13F-HR"],
                    "accessionNumber": ["0000950123-24-008740", "0000950123-24-001000", "0000950123-23-006555"],
                    "filingDate": ["2024-08-14", "2024-02-01", "2023-05-15"]
                }
            }
        }"#;
        let (recent, archived) = parse_filing_history(json).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(archived.len(), 3);
        assert_eq!(
            recent[0],
            "https://www.sec.gov/Archives/edgar/data/1067983/000095012324008740/0000950123-24-008740-index.htm"
        );
    }

    #[test]
    fn old_format_filing_suppresses_archive_walk() {
        let json = r#"{
            "cik": "1067983",
            "filings": {
                "files": [{"name": "CIK0001067983-submissions-001.json"}],
                "recent": {
                    "form": ["13F-HR", "13F-HR"],
                    "accessionNumber": ["0000950123-24-008740", "0000950123-09-000001"],
                    "filingDate": ["2024-08-14", "2009-02-17"]
                }
            }
        }"#;
        let (recent, archived) = parse_filing_history(json).unwrap();
        assert_eq!(recent.len(), 1);
        assert!(archived.is_empty());
    }

    #[test]
    fn archived_payload_yields_filing_urls_for_13f_only() {
        let json = r#"{
            "form": ["13F-HR", "4", "13F-HR"],
            "accessionNumber": ["0000950123-12-000100", "0000950123-12-000200", "0000950123-11-000300"]
        }"#;
        let urls = parse_archived_submissions(
            json,
            "https://data.sec.gov/submissions/CIK0001067983-submissions-001.json",
        )
        .unwrap();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].contains("/data/1067983/"));
    }

    #[test]
    fn filing_url_parses_back_into_cik_and_accession() {
        let (cik, accession) = parse_filing_url(
            "https://www.sec.gov/Archives/edgar/data/1067983/000095012324008740/0000950123-24-008740-index.htm",
        )
        .unwrap();
        assert_eq!(cik, "0001067983");
        assert_eq!(accession, "0000950123-24-008740");
    }

    const HOME_PAGE_FIXTURE: &str = r#"
        <div id="formDiv">
          <strong>13F-HR</strong>
          <div class="infoHead">Filing Date</div><div class="info">2024-08-14</div>
          <div class="infoHead">Period of Report</div><div class="info">2024-06-30</div>
          <div class="infoHead">Accepted</div><div class="info">2024-08-14 16:01:22</div>
          <table class="tableFile" summary="Document Format Files">
            <tr><td>1</td><td>primary doc</td><td><a href="/Archives/edgar/data/1067983/primary.xml">primary.xml</a></td><td>13F-HR</td></tr>
            <tr><td>2</td><td>INFORMATION TABLE</td><td><a href="/Archives/edgar/data/1067983/form13fInfoTable.html">form13fInfoTable.html</a></td><td>INFORMATION TABLE</td></tr>
          </table>
        </div>
        <span class="companyName">BERKSHIRE HATHAWAY INC (Filer)</span>"#;

    #[test]
    fn home_page_yields_metadata_and_info_table_url() {
        let (metadata, info_url) = parse_form_home_page(HOME_PAGE_FIXTURE).unwrap();
        assert_eq!(metadata.form_name.as_deref(), Some("13F-HR"));
        assert_eq!(metadata.company_name.as_deref(), Some("BERKSHIRE HATHAWAY INC"));
        assert_eq!(metadata.filing_date.as_deref(), Some("2024-08-14"));
        assert_eq!(metadata.acceptance_date.as_deref(), Some("2024-08-14"));
        assert_eq!(
            info_url.as_deref(),
            Some("https://www.sec.gov/Archives/edgar/data/1067983/form13fInfoTable.html")
        );
    }

    #[test]
    fn info_table_rows_become_staged_investments() {
        let html = r#"
            <table summary="Form 13F-NT Header Information">
              <tr><td>NAME OF ISSUER</td></tr>
              <tr><td>TITLE OF CLASS</td></tr>
              <tr><td>CUSIP</td></tr>
              <tr>
                <td>APPLE INC</td><td>COM</td><td>037833100</td>
                <td>84,248,000</td><td>400,000,000</td><td>SH</td>
                <td>&#160;</td><td>DFND</td><td>4</td>
                <td>400,000,000</td><td>0</td><td>0</td>
              </tr>
            </table>"#;
        let metadata = FilingMetadata {
            form_name: Some("13F-HR".to_string()),
            company_name: Some("BERKSHIRE HATHAWAY INC".to_string()),
            report_period: Some("2024-06-30".to_string()),
            ..FilingMetadata::default()
        };
        let investments = parse_info_table(
            html,
            &metadata,
            "0001067983",
            "0000950123-24-008740",
            "https://www.sec.gov/Archives/edgar/data/1067983/000095012324008740/0000950123-24-008740-index.htm",
        )
        .unwrap();

        assert_eq!(investments.len(), 1);
        let holding = &investments[0];
        assert_eq!(holding.stock_issuer_name, "APPLE INC");
        assert_eq!(holding.stock_cusip, "037833100");
        assert_eq!(holding.stock_value_x1000, 84_248_000);
        assert_eq!(holding.stock_shares_prn_amt, 400_000_000);
        assert_eq!(holding.stock_put_call, None);
        assert_eq!(holding.stock_manager, "4");
        assert_eq!(holding.company_cik, "0001067983");
    }

    #[test]
    fn blank_cells_and_filer_suffixes_are_cleaned() {
        assert_eq!(replace_null("\u{a0}"), None);
        assert_eq!(replace_null(""), None);
        assert_eq!(replace_null(" SH "), Some("SH".to_string()));
        assert_eq!(
            correct_company_name("STATE STREET CORP (Filer)").as_deref(),
            Some("STATE STREET CORP")
        );
        assert_eq!(format_date("2024-08-14 16:01:22").as_deref(), Some("2024-08-14"));
    }
}
