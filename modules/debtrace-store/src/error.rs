use thiserror::Error;

/// Errors raised by the storage gateway client.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level failure reaching the store API.
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The store API answered with an error status.
    #[error("store API error for {record_type} ({status}): {message}")]
    Api {
        record_type: &'static str,
        status: u16,
        message: String,
    },

    /// A response body did not match the expected schema.
    #[error("failed to decode {record_type} response: {message}")]
    Decode {
        record_type: &'static str,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;
