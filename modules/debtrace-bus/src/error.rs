use thiserror::Error;

/// Errors raised by message bus clients.
#[derive(Debug, Error)]
pub enum BusError {
    /// Transport-level failure reaching the bus endpoint.
    #[error("bus request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The bus API answered with an error status.
    #[error("bus API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A message payload could not be encoded or decoded.
    #[error("bus payload error: {0}")]
    Payload(String),

    /// An ack referenced a delivery the broker no longer tracks.
    #[error("unknown ack id \"{0}\"")]
    UnknownAckId(String),
}

pub type Result<T> = std::result::Result<T, BusError>;
