//! Core domain types shared by every stage of the pipeline.
//!
//! A Job is one pipeline invocation. It owns Tasks (units of scraping
//! work), which own staged records via `task_id`. Staged records are
//! consumed and deleted by the transform stage.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp format used in audit messages, e.g. `2026_03_01_14_22_05`.
pub const AUDIT_TIME_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// The kind of work a pipeline job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "dev-bank-projects")]
    DevBankProjects,
    #[serde(rename = "form-13f")]
    Form13f,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::DevBankProjects => write!(f, "dev-bank-projects"),
            JobType::Form13f => write!(f, "form-13f"),
        }
    }
}

/// Status of a job stage or a task. Stages advance monotonically
/// NotStarted → InProgress → Completed | Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    #[serde(rename = "Not Started")]
    NotStarted,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Error")]
    Error,
}

/// One pipeline invocation, spanning data collection and transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub invocation_id: String,
    pub job_type: JobType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_load_stage: Option<StageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_load_start_utc: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_load_end_utc: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_clean_stage: Option<StageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_clean_start_utc: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_clean_end_utc: Option<DateTime<Utc>>,
}

/// Partial update for a job, serialized with only the populated fields.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobUpdate {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_load_stage: Option<StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_load_start_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_load_end_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_clean_stage: Option<StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_clean_start_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_clean_end_utc: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// A named data origin. Everything except `Sec` is a development bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Adb,
    Afdb,
    Aiib,
    Bio,
    Deg,
    Dfc,
    Ebrd,
    Eib,
    Fmo,
    Idb,
    Ifc,
    Kfw,
    Miga,
    Nbim,
    Pro,
    Undp,
    Wb,
    Sec,
}

impl Source {
    pub const ALL: [Source; 18] = [
        Source::Adb,
        Source::Afdb,
        Source::Aiib,
        Source::Bio,
        Source::Deg,
        Source::Dfc,
        Source::Ebrd,
        Source::Eib,
        Source::Fmo,
        Source::Idb,
        Source::Ifc,
        Source::Kfw,
        Source::Miga,
        Source::Nbim,
        Source::Pro,
        Source::Undp,
        Source::Wb,
        Source::Sec,
    ];

    /// Lowercase identifier used on the wire and in trigger payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Adb => "adb",
            Source::Afdb => "afdb",
            Source::Aiib => "aiib",
            Source::Bio => "bio",
            Source::Deg => "deg",
            Source::Dfc => "dfc",
            Source::Ebrd => "ebrd",
            Source::Eib => "eib",
            Source::Fmo => "fmo",
            Source::Idb => "idb",
            Source::Ifc => "ifc",
            Source::Kfw => "kfw",
            Source::Miga => "miga",
            Source::Nbim => "nbim",
            Source::Pro => "pro",
            Source::Undp => "undp",
            Source::Wb => "wb",
            Source::Sec => "sec",
        }
    }

    /// Uppercase abbreviation stored in staged and canonical records.
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Source::Adb => "ADB",
            Source::Afdb => "AFDB",
            Source::Aiib => "AIIB",
            Source::Bio => "BIO",
            Source::Deg => "DEG",
            Source::Dfc => "DFC",
            Source::Ebrd => "EBRD",
            Source::Eib => "EIB",
            Source::Fmo => "FMO",
            Source::Idb => "IDB",
            Source::Ifc => "IFC",
            Source::Kfw => "KFW",
            Source::Miga => "MIGA",
            Source::Nbim => "NBIM",
            Source::Pro => "PRO",
            Source::Undp => "UNDP",
            Source::Wb => "WB",
            Source::Sec => "SEC",
        }
    }

    /// Which job type this source belongs to. Mixing job types in one
    /// trigger is rejected by the intake service.
    pub fn job_type(&self) -> JobType {
        match self {
            Source::Sec => JobType::Form13f,
            _ => JobType::DevBankProjects,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .iter()
            .find(|src| src.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown source \"{s}\""))
    }
}

// ---------------------------------------------------------------------------
// Workflow types
// ---------------------------------------------------------------------------

/// Closed set of workflow-type identifiers routed over the bus.
///
/// `Dynamic` is a sentinel for workflows whose follow-up depends on
/// runtime content (the filing-history case); it never appears in a
/// task row or registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowType {
    #[serde(rename = "seed-urls")]
    SeedUrls,
    #[serde(rename = "results-page")]
    ResultsPage,
    #[serde(rename = "results-page-multi")]
    ResultsPageMulti,
    #[serde(rename = "project-page")]
    ProjectPage,
    #[serde(rename = "project-page-partial")]
    ProjectPagePartial,
    #[serde(rename = "download")]
    Download,
    #[serde(rename = "filing-history")]
    FilingHistory,
    #[serde(rename = "filing-archive")]
    FilingArchive,
    #[serde(rename = "filing-scrape")]
    FilingScrape,
    #[serde(rename = "dynamic")]
    Dynamic,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::SeedUrls => "seed-urls",
            WorkflowType::ResultsPage => "results-page",
            WorkflowType::ResultsPageMulti => "results-page-multi",
            WorkflowType::ProjectPage => "project-page",
            WorkflowType::ProjectPagePartial => "project-page-partial",
            WorkflowType::Download => "download",
            WorkflowType::FilingHistory => "filing-history",
            WorkflowType::FilingArchive => "filing-archive",
            WorkflowType::FilingScrape => "filing-scrape",
            WorkflowType::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Request to create one scraping task. `(job_id, source,
/// workflow_type, url)` is unique in the store; duplicate requests are
/// dropped by the conflict-ignore bulk insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub job_id: i64,
    pub status: StageStatus,
    pub source: Source,
    pub url: String,
    pub workflow_type: WorkflowType,
}

impl TaskRequest {
    pub fn new(job_id: i64, source: Source, url: impl Into<String>, workflow_type: WorkflowType) -> Self {
        Self {
            job_id,
            status: StageStatus::NotStarted,
            source,
            url: url.into(),
            workflow_type,
        }
    }
}

/// A task row as returned by the store after creation. Doubles as the
/// bus message payload for scraper nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub job_id: i64,
    pub source: Source,
    pub workflow_type: WorkflowType,
    pub url: String,
}

/// Partial update for a task, accumulated over one `execute` call and
/// persisted on both the success and failure paths.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskUpdate {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_start_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_end_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraping_start_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraping_end_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failed_at_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<i64>,
}

impl TaskUpdate {
    pub fn begin(task_id: i64, delivery_attempts: i64) -> Self {
        Self {
            id: task_id,
            processing_start_utc: Some(Utc::now()),
            retry_count: Some(delivery_attempts.saturating_sub(1)),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Staged records
// ---------------------------------------------------------------------------

/// A raw or partial project record extracted by a workflow. Two rows
/// for the same `url` may coexist (results-page pass and project-page
/// pass); the transform stage reconciles them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagedProject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub bank: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub month: Option<u32>,
    #[serde(default)]
    pub day: Option<u32>,
    #[serde(default)]
    pub loan_amount: Option<f64>,
    #[serde(default)]
    pub loan_amount_currency: Option<String>,
    #[serde(default)]
    pub loan_amount_usd: Option<f64>,
    #[serde(default)]
    pub sectors: Option<String>,
    #[serde(default)]
    pub countries: Option<String>,
    #[serde(default)]
    pub companies: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
}

/// A staged Form 13F holding row: one equity position from a filing's
/// information table, flattened together with form and filer metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagedInvestment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub company_cik: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub form_name: Option<String>,
    pub form_accession_number: String,
    #[serde(default)]
    pub form_report_period: Option<String>,
    #[serde(default)]
    pub form_filing_date: Option<String>,
    #[serde(default)]
    pub form_acceptance_date: Option<String>,
    #[serde(default)]
    pub form_effective_date: Option<String>,
    pub form_url: String,
    pub stock_issuer_name: String,
    #[serde(default)]
    pub stock_title_class: Option<String>,
    pub stock_cusip: String,
    pub stock_value_x1000: i64,
    pub stock_shares_prn_amt: i64,
    #[serde(default)]
    pub stock_sh_prn: Option<String>,
    #[serde(default)]
    pub stock_put_call: Option<String>,
    #[serde(default)]
    pub stock_investment_discretion: Option<String>,
    #[serde(default)]
    pub stock_manager: String,
    pub stock_voting_auth_sole: i64,
    pub stock_voting_auth_shared: i64,
    pub stock_voting_auth_none: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Bus envelopes
// ---------------------------------------------------------------------------

/// One-per-job message emitted after quiescence; triggers the
/// transform stage for that job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMessage {
    pub job_id: i64,
    pub time_completed_utc: String,
}

impl AuditMessage {
    pub fn new(job_id: i64, completed_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            time_completed_utc: completed_at.format(AUDIT_TIME_FORMAT).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_type_round_trips_through_serde() {
        let json = serde_json::to_string(&WorkflowType::ResultsPageMulti).unwrap();
        assert_eq!(json, "\"results-page-multi\"");
        let back: WorkflowType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, WorkflowType::ResultsPageMulti);
    }

    #[test]
    fn source_parses_from_trigger_payload_form() {
        assert_eq!("adb".parse::<Source>().unwrap(), Source::Adb);
        assert_eq!("sec".parse::<Source>().unwrap(), Source::Sec);
        assert!("worldbank".parse::<Source>().is_err());
    }

    #[test]
    fn sec_is_the_only_filing_source() {
        let filing: Vec<_> = Source::ALL
            .iter()
            .filter(|s| s.job_type() == JobType::Form13f)
            .collect();
        assert_eq!(filing, vec![&Source::Sec]);
    }

    #[test]
    fn task_update_serializes_only_populated_fields() {
        let update = TaskUpdate::begin(7, 3);
        let value = serde_json::to_value(&update).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["id"], 7);
        assert_eq!(obj["retry_count"], 2);
        assert!(obj.contains_key("processing_start_utc"));
        assert!(!obj.contains_key("status"));
        assert!(!obj.contains_key("last_error_message"));
    }

    #[test]
    fn audit_message_uses_underscore_timestamp() {
        let at = chrono::DateTime::parse_from_rfc3339("2026-03-01T14:22:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let msg = AuditMessage::new(42, at);
        assert_eq!(msg.time_completed_utc, "2026_03_01_14_22_05");
    }

    #[test]
    fn stage_status_uses_display_strings() {
        assert_eq!(
            serde_json::to_string(&StageStatus::NotStarted).unwrap(),
            "\"Not Started\""
        );
    }
}
