//! Shared HTTP fetcher for scraping workflows.
//!
//! Rotates user-agent headers from a configured pool and injects random
//! delays between requests so source sites see browser-like traffic.
//! All extractors reach the network through the [`PageFetcher`] trait,
//! which keeps them testable with a canned in-memory fetcher.

pub mod error;
pub mod renderer;

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

pub use error::{FetchError, Result};
pub use renderer::{ChromeRenderer, PageRenderer};

/// Default per-request timeout. Large bulk downloads opt out with
/// [`FetchOptions::no_timeout`].
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// Per-request knobs. The defaults make a plain 60-second GET with no
/// delay and no user-agent rotation.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub random_user_agent: bool,
    /// Inclusive (min, max) seconds to sleep before the request.
    pub random_delay: Option<(u64, u64)>,
    /// `None` means wait indefinitely (bulk downloads).
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self {
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            ..Self::default()
        }
    }

    /// Browser-like settings used by most page scrapes: rotate the
    /// user agent and wait 1–3 seconds first.
    pub fn browser_like() -> Self {
        Self {
            random_user_agent: true,
            random_delay: Some((1, 3)),
            ..Self::new()
        }
    }

    pub fn delay(mut self, min_seconds: u64, max_seconds: u64) -> Self {
        self.random_delay = Some((min_seconds, max_seconds));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }
}

/// A fetched HTTP response. The body is kept as raw bytes because some
/// sources hand back CSV or spreadsheet exports rather than text.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|source| FetchError::Decode {
            url: self.url.clone(),
            source,
        })
    }

    /// Errors unless the status is 2xx; the body tail is carried into
    /// the error so task failure messages stay greppable.
    pub fn ensure_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            let mut body = self.text().into_owned();
            body.truncate(512);
            Err(FetchError::Status {
                url: self.url,
                status: self.status,
                body,
            })
        }
    }
}

/// Network seam for every extractor.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &str, opts: FetchOptions) -> Result<FetchResponse>;

    /// POST a JSON payload. A handful of sources expose their project
    /// list only behind a POST endpoint.
    async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
        opts: FetchOptions,
    ) -> Result<FetchResponse>;
}

/// Concrete fetcher over a shared `reqwest::Client`.
///
/// Holds no mutable state besides the read-only user-agent pool, so a
/// single instance is shared across all workers.
pub struct Fetcher {
    client: reqwest::Client,
    user_agents: Vec<String>,
}

impl Fetcher {
    pub fn new(user_agents: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agents,
        }
    }

    /// Loads the user-agent pool from a JSON array file.
    pub fn from_agent_pool_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| FetchError::AgentPool {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let user_agents: Vec<String> =
            serde_json::from_str(&raw).map_err(|e| FetchError::AgentPool {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        info!(path, agents = user_agents.len(), "Loaded user agent pool");
        Ok(Self::new(user_agents))
    }

    async fn apply_delay(&self, opts: &FetchOptions) {
        if let Some((min, max)) = opts.random_delay {
            let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
            let delay = rand::rng().random_range(lo..=hi);
            debug!(delay_seconds = delay, "Sleeping before request");
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
    }

    fn build_request(
        &self,
        mut request: reqwest::RequestBuilder,
        opts: &FetchOptions,
    ) -> reqwest::RequestBuilder {
        if opts.random_user_agent && opts.headers.is_empty() && !self.user_agents.is_empty() {
            let idx = rand::rng().random_range(0..self.user_agents.len());
            request = request.header("User-Agent", self.user_agents[idx].clone());
        }
        for (name, value) in &opts.headers {
            request = request.header(name, value);
        }
        if let Some(timeout) = opts.timeout {
            request = request.timeout(timeout);
        }
        request
    }

    async fn send(&self, url: &str, request: reqwest::RequestBuilder) -> Result<FetchResponse> {
        let response = request.send().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?
            .to_vec();
        debug!(url, status, bytes = body.len(), "Fetched");
        Ok(FetchResponse {
            url: url.to_string(),
            status,
            body,
        })
    }
}

#[async_trait]
impl PageFetcher for Fetcher {
    async fn get(&self, url: &str, opts: FetchOptions) -> Result<FetchResponse> {
        self.apply_delay(&opts).await;
        let request = self.build_request(self.client.get(url), &opts);
        self.send(url, request).await
    }

    async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
        opts: FetchOptions,
    ) -> Result<FetchResponse> {
        self.apply_delay(&opts).await;
        let request = self.build_request(self.client.post(url).json(payload), &opts);
        self.send(url, request).await
    }
}
