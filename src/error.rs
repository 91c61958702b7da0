use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Keyring(#[from] keyring::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

/// Failures talking to the cost API. All of them abort the run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("cost API rejected credentials (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("requested start {start} is older than the cost API lookback window (earliest {earliest})")]
    RangeExceedsLookback { start: NaiveDate, earliest: NaiveDate },

    #[error("cost API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid cost API response: {0}")]
    InvalidResponse(String),

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}
