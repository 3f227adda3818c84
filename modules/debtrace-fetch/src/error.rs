use thiserror::Error;

/// Errors raised by the shared HTTP fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (connect, TLS, timeout).
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status code.
    #[error("request to {url} returned status {status}: {body}")]
    Status { url: String, status: u16, body: String },

    /// The response body could not be decoded as the expected shape.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The user-agent pool file could not be loaded.
    #[error("failed to load user agent pool from {path}: {reason}")]
    AgentPool { path: String, reason: String },

    /// A headless-browser render failed.
    #[error("failed to render {url}: {reason}")]
    Render { url: String, reason: String },
}

pub type Result<T> = std::result::Result<T, FetchError>;
