//! Stock metadata enrichment via an Open-FIGI-compatible mapping API.
//!
//! CUSIP lookups are batched to the API's per-request job limit and
//! throttled to a fixed request rate. A 429 sleeps out one rate
//! window and retries once before giving up.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Result, TransformError};

/// Metadata for one CUSIP. Unresolvable identifiers keep their cusip
/// and leave every other field empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StockMetadata {
    pub cusip: String,
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub exchange_code: Option<String>,
    pub market_sector: Option<String>,
    pub security_type: Option<String>,
}

/// Seam for tests; implemented by [`StocksClient`].
#[async_trait]
pub trait StockMetadataProvider: Send + Sync {
    async fn fetch_stock_metadata(&self, cusips: &[String]) -> Result<Vec<StockMetadata>>;
}

#[derive(Debug, Deserialize)]
struct MappingResult {
    #[serde(default)]
    data: Vec<MappingEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    ticker: Option<String>,
    #[serde(default)]
    exch_code: Option<String>,
    #[serde(default)]
    market_sector: Option<String>,
    #[serde(default)]
    security_type: Option<String>,
}

pub struct StocksClient {
    client: reqwest::Client,
    mapping_url: String,
    api_key: String,
    max_jobs_per_request: usize,
    max_requests_per_window: usize,
    request_window: Duration,
}

impl StocksClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        max_jobs_per_request: usize,
        max_requests_per_window: usize,
        request_window: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            mapping_url: format!("{}/v3/mapping", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            max_jobs_per_request: max_jobs_per_request.max(1),
            max_requests_per_window: max_requests_per_window.max(1),
            request_window,
        }
    }

    async fn request_batch(&self, batch: &[String]) -> Result<reqwest::Response> {
        let lookups: Vec<serde_json::Value> = batch
            .iter()
            .map(|cusip| serde_json::json!({ "idType": "ID_CUSIP", "idValue": cusip }))
            .collect();
        let response = self
            .client
            .post(&self.mapping_url)
            .header("Content-Type", "application/json")
            .header("X-OPENFIGI-APIKEY", &self.api_key)
            .json(&lookups)
            .send()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl StockMetadataProvider for StocksClient {
    async fn fetch_stock_metadata(&self, cusips: &[String]) -> Result<Vec<StockMetadata>> {
        let mut metadata = Vec::with_capacity(cusips.len());
        let mut requests_made = 0usize;

        for batch in cusips.chunks(self.max_jobs_per_request) {
            info!(cusips = batch.len(), "Requesting stock metadata batch");
            let mut response = self.request_batch(batch).await?;
            requests_made += 1;

            if response.status().as_u16() == 429 {
                warn!(
                    window_seconds = self.request_window.as_secs(),
                    "Throttled by metadata API; sleeping one rate window"
                );
                tokio::time::sleep(self.request_window).await;
                response = self.request_batch(batch).await?;
                requests_made += 1;
            }

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(TransformError::StocksApi {
                    status: status.as_u16(),
                    message,
                });
            }

            let results: Vec<MappingResult> = response.json().await?;
            for (cusip, result) in batch.iter().zip(results) {
                metadata.push(to_metadata(cusip, result));
            }

            // Stay under the fixed request rate.
            if requests_made % self.max_requests_per_window == 0 {
                tokio::time::sleep(self.request_window).await;
            }
        }

        Ok(metadata)
    }
}

/// The first mapping entry wins, except exchange codes, which join
/// across every listing of the security.
fn to_metadata(cusip: &str, result: MappingResult) -> StockMetadata {
    let exchange_code = {
        let codes: Vec<&str> = result
            .data
            .iter()
            .filter_map(|entry| entry.exch_code.as_deref())
            .filter(|code| !code.is_empty())
            .collect();
        if codes.is_empty() {
            None
        } else {
            Some(codes.join(", "))
        }
    };
    let first = result.data.into_iter().next();
    match first {
        Some(entry) => StockMetadata {
            cusip: cusip.to_string(),
            name: entry.name,
            ticker: entry.ticker,
            exchange_code,
            market_sector: entry.market_sector,
            security_type: entry.security_type,
        },
        None => StockMetadata {
            cusip: cusip.to_string(),
            ..StockMetadata::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, batch_size: usize) -> StocksClient {
        StocksClient::new(
            &server.uri(),
            "test-key",
            batch_size,
            25,
            Duration::from_millis(10),
        )
    }

    fn cusips(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{i:09}")).collect()
    }

    #[tokio::test]
    async fn lookups_batch_to_the_job_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mapping"))
            .respond_with(|req: &wiremock::Request| {
                let jobs: Vec<serde_json::Value> = serde_json::from_slice(&req.body).unwrap();
                let results: Vec<serde_json::Value> = jobs
                    .iter()
                    .map(|_| serde_json::json!({ "data": [] }))
                    .collect();
                ResponseTemplate::new(200).set_body_json(results)
            })
            .expect(3)
            .mount(&server)
            .await;

        let metadata = client(&server, 100)
            .fetch_stock_metadata(&cusips(251))
            .await
            .unwrap();
        assert_eq!(metadata.len(), 251);
        assert_eq!(metadata[0].cusip, "000000000");
        assert!(metadata[0].ticker.is_none());
    }

    #[tokio::test]
    async fn throttle_sleeps_and_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mapping"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/mapping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "data": [{ "name": "APPLE INC", "ticker": "AAPL",
                             "exchCode": "US", "marketSector": "Equity",
                             "securityType": "Common Stock" }] }
            ])))
            .mount(&server)
            .await;

        let metadata = client(&server, 100)
            .fetch_stock_metadata(&["037833100".to_string()])
            .await
            .unwrap();
        assert_eq!(metadata[0].ticker.as_deref(), Some("AAPL"));
        assert_eq!(metadata[0].market_sector.as_deref(), Some("Equity"));
    }

    #[tokio::test]
    async fn persistent_throttle_is_an_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        match client(&server, 100)
            .fetch_stock_metadata(&["037833100".to_string()])
            .await
        {
            Err(TransformError::StocksApi { status, .. }) => assert_eq!(status, 429),
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[test]
    fn exchange_codes_join_across_listings() {
        let result: MappingResult = serde_json::from_str(
            r#"{ "data": [
                { "name": "ACME", "ticker": "ACME", "exchCode": "US" },
                { "name": "ACME", "ticker": "ACME", "exchCode": "LN" }
            ]}"#,
        )
        .unwrap();
        let metadata = to_metadata("123456789", result);
        assert_eq!(metadata.exchange_code.as_deref(), Some("US, LN"));
        assert_eq!(metadata.ticker.as_deref(), Some("ACME"));
    }
}
