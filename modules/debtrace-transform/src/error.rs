use thiserror::Error;

/// Errors raised while transforming staged records.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Store(#[from] debtrace_store::StoreError),

    #[error("reference data error: {0}")]
    Reference(String),

    #[error("stock metadata request failed: {0}")]
    StocksTransport(#[from] reqwest::Error),

    #[error("stock metadata API error ({status}): {message}")]
    StocksApi { status: u16, message: String },
}

/// A currency or deflator lookup that has no entry. Callers turn this
/// into a null output field; it never aborts a batch.
#[derive(Debug, Error, PartialEq)]
pub enum CurrencyError {
    #[error("no exchange rate exists for currency \"{currency}\" in country \"{country}\" and year {year}")]
    MissingRate {
        year: i32,
        country: String,
        currency: String,
    },

    #[error("no USD deflation rate exists for the year {0}")]
    MissingDeflator(i32),
}

pub type Result<T> = std::result::Result<T, TransformError>;
