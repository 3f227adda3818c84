//! Currency normalization to reference-year U.S. dollars.
//!
//! Two reference tables load once at startup: bilateral annual USD
//! exchange rates from the BIS data portal (SDMX CSV) and the U.S.
//! GDP implicit price deflator series from FRED (index 100 = 2017).
//! `normalize` is then a pure function over those tables.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::info;

use crate::error::{CurrencyError, Result, TransformError};

/// `(year, ISO-3166 alpha-2 country, ISO-4217 currency) → rate to USD`.
pub struct ExchangeRates {
    rates: HashMap<(i32, String, String), f64>,
}

impl ExchangeRates {
    pub fn from_parts(entries: impl IntoIterator<Item = (i32, &'static str, &'static str, f64)>) -> Self {
        Self {
            rates: entries
                .into_iter()
                .map(|(year, country, currency, rate)| {
                    ((year, country.to_string(), currency.to_string()), rate)
                })
                .collect(),
        }
    }

    /// Parses the BIS SDMX CSV dump, keeping annual end-of-period
    /// observations for countries and currencies present in the
    /// reference code lists.
    pub fn from_sdmx_csv(
        body: &[u8],
        known_countries: &HashSet<String>,
        known_currencies: &HashSet<String>,
    ) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(body);
        let headers = reader
            .headers()
            .map_err(|e| TransformError::Reference(format!("unreadable exchange rate header. {e}")))?
            .clone();
        let index = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    TransformError::Reference(format!("exchange rate CSV is missing \"{name}\""))
                })
        };
        let freq_idx = index("FREQ")?;
        let area_idx = index("REF_AREA")?;
        let currency_idx = index("CURRENCY")?;
        let collection_idx = index("COLLECTION")?;
        let period_idx = index("TIME_PERIOD")?;
        let value_idx = index("OBS_VALUE")?;

        let mut rates = HashMap::new();
        for row in reader.records() {
            let row = row
                .map_err(|e| TransformError::Reference(format!("bad exchange rate row. {e}")))?;
            if row.get(freq_idx) != Some("A") || row.get(collection_idx) != Some("E") {
                continue;
            }
            let (Some(area), Some(currency), Some(period), Some(value)) = (
                row.get(area_idx),
                row.get(currency_idx),
                row.get(period_idx),
                row.get(value_idx),
            ) else {
                continue;
            };
            let area = area.to_uppercase();
            if !known_countries.contains(&area) || !known_currencies.contains(currency) {
                continue;
            }
            let (Ok(year), Ok(rate)) = (period.parse::<i32>(), value.parse::<f64>()) else {
                continue;
            };
            rates.insert((year, area, currency.to_string()), rate);
        }
        info!(rates = rates.len(), "Loaded exchange rates");
        Ok(Self { rates })
    }

    fn get(&self, year: i32, country: &str, currency: &str) -> Option<f64> {
        self.rates
            .get(&(year, country.to_string(), currency.to_string()))
            .copied()
    }
}

/// `year → U.S. GDP implicit price deflator`, index 100 = 2017.
pub struct Deflators {
    by_year: HashMap<i32, f64>,
}

#[derive(Debug, Deserialize)]
struct FredObservations {
    observations: Vec<FredObservation>,
}

#[derive(Debug, Deserialize)]
struct FredObservation {
    date: String,
    value: String,
}

impl Deflators {
    pub fn from_parts(entries: impl IntoIterator<Item = (i32, f64)>) -> Self {
        Self {
            by_year: entries.into_iter().collect(),
        }
    }

    /// Parses a FRED series-observations payload. Placeholder values
    /// ("." for missing periods) are skipped.
    pub fn from_fred_json(body: &[u8]) -> Result<Self> {
        let payload: FredObservations = serde_json::from_slice(body).map_err(|e| {
            TransformError::Reference(format!("deflator payload is not the expected JSON. {e}"))
        })?;
        if payload.observations.is_empty() {
            return Err(TransformError::Reference(
                "no deflator observations found".to_string(),
            ));
        }

        let mut by_year = HashMap::new();
        for observation in payload.observations {
            let Some(year) = observation.date.get(..4).and_then(|y| y.parse::<i32>().ok()) else {
                continue;
            };
            if let Ok(value) = observation.value.parse::<f64>() {
                by_year.insert(year, value);
            }
        }
        info!(years = by_year.len(), "Loaded GDP price deflators");
        Ok(Self { by_year })
    }

    fn get(&self, year: i32) -> Option<f64> {
        self.by_year.get(&year).copied()
    }
}

/// Normalizes arbitrary `(year, country, currency, amount)` tuples to
/// 2017 U.S. dollars.
pub struct CurrencyEngine {
    rates: ExchangeRates,
    deflators: Deflators,
}

impl CurrencyEngine {
    pub fn new(rates: ExchangeRates, deflators: Deflators) -> Self {
        Self { rates, deflators }
    }

    /// Fetches both reference tables. Called once at service startup.
    pub async fn load(
        client: &reqwest::Client,
        exchange_rates_url: &str,
        fred_base_url: &str,
        fred_api_key: &str,
        known_countries: &HashSet<String>,
        known_currencies: &HashSet<String>,
    ) -> Result<Self> {
        let rates_body = fetch_reference(client, exchange_rates_url).await?;
        let rates = ExchangeRates::from_sdmx_csv(&rates_body, known_countries, known_currencies)?;

        let deflator_url = format!(
            "{fred_base_url}/series/observations?series_id=A191RD3A086NBEA&api_key={fred_api_key}&file_type=json"
        );
        let deflator_body = fetch_reference(client, &deflator_url).await?;
        let deflators = Deflators::from_fred_json(&deflator_body)?;

        Ok(Self::new(rates, deflators))
    }

    /// Currency of origin matters even for nominal rates: retroactive
    /// euro series and unofficial adoptions differ by country, so the
    /// lookup keys on all three of year, country, and currency.
    pub fn normalize(
        &self,
        year: i32,
        country: &str,
        currency: &str,
        amount: f64,
    ) -> std::result::Result<f64, CurrencyError> {
        let rate = self
            .rates
            .get(year, country, currency)
            .ok_or_else(|| CurrencyError::MissingRate {
                year,
                country: country.to_string(),
                currency: currency.to_string(),
            })?;
        let deflator = self
            .deflators
            .get(year)
            .ok_or(CurrencyError::MissingDeflator(year))?;

        let normalized = amount * (1.0 / rate) * (100.0 / deflator);
        Ok((normalized * 100.0).round() / 100.0)
    }
}

async fn fetch_reference(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| TransformError::Reference(format!("failed to fetch \"{url}\". {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransformError::Reference(format!(
            "\"{url}\" returned status {status}"
        )));
    }
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| TransformError::Reference(format!("failed to read \"{url}\". {e}")))
}

/// Reads one column out of a reference CSV (currency and country code
/// lists) into a set for the exchange-rate join.
pub fn load_code_column(path: &str, column: &str) -> Result<HashSet<String>> {
    let raw = std::fs::read(path)
        .map_err(|e| TransformError::Reference(format!("failed to load \"{path}\". {e}")))?;
    let mut reader = csv::Reader::from_reader(raw.as_slice());
    let headers = reader
        .headers()
        .map_err(|e| TransformError::Reference(format!("unreadable header in \"{path}\". {e}")))?
        .clone();
    let idx = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(column))
        .ok_or_else(|| {
            TransformError::Reference(format!("\"{path}\" is missing a \"{column}\" column"))
        })?;

    let mut codes = HashSet::new();
    for row in reader.records() {
        let row =
            row.map_err(|e| TransformError::Reference(format!("bad row in \"{path}\". {e}")))?;
        if let Some(code) = row.get(idx) {
            let code = code.trim().to_uppercase();
            if !code.is_empty() {
                codes.insert(code);
            }
        }
    }
    Ok(codes)
}
