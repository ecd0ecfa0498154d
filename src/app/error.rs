use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PagewatchError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Errors raised while retrieving a tracked page.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse URL: {0}")]
    InvalidUrl(String),
}

/// Errors raised while producing a deliverable file.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("All {attempts} download methods failed for {url}")]
    Exhausted { url: String, attempts: usize },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("File too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("Failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PagewatchError>;
