//! Wire shapes for the canonical side of the store API: reference
//! data consumed read-only and the finalized records the transform
//! stage upserts.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Bank {
    pub id: i64,
    pub abbrev_name: String,
    #[serde(default)]
    pub ac_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountryRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub iso_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectorRecord {
    pub id: i64,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Canonical projects
// ---------------------------------------------------------------------------

/// A finalized project record, unique on `(bank, url)`. Upserts update
/// every mutable column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub bank_id: Option<i64>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ac_name: Option<String>,
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
    pub sector_list_raw: Option<String>,
    #[serde(default)]
    pub sector_list_stnd: Option<String>,
    #[serde(default)]
    pub companies: Option<String>,
    #[serde(default)]
    pub country_list_raw: Option<String>,
    #[serde(default)]
    pub country_list_stnd: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCountry {
    pub project_id: i64,
    pub country_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSector {
    pub project_id: i64,
    pub sector_id: i64,
}

// ---------------------------------------------------------------------------
// Form 13F entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Company {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub cik: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Form {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub company_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    pub accession_number: String,
    #[serde(default)]
    pub report_period: Option<String>,
    #[serde(default)]
    pub filing_date: Option<String>,
    #[serde(default)]
    pub acceptance_date: Option<String>,
    #[serde(default)]
    pub effective_date: Option<String>,
    pub url: String,
}

/// A finalized holding, unique on `(form_id, cusip, manager)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub form_id: i64,
    #[serde(default)]
    pub exchange_code: Option<String>,
    pub issuer_name: String,
    pub cusip: String,
    #[serde(default)]
    pub title_class: Option<String>,
    #[serde(default)]
    pub market_sector: Option<String>,
    #[serde(default)]
    pub security_type: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
    pub value_x1000: i64,
    pub shares_prn_amt: i64,
    #[serde(default)]
    pub sh_prn: Option<String>,
    #[serde(default)]
    pub put_call: Option<String>,
    #[serde(default)]
    pub investment_discretion: Option<String>,
    #[serde(default)]
    pub manager: String,
    pub voting_auth_sole: i64,
    pub voting_auth_shared: i64,
    pub voting_auth_none: i64,
}
