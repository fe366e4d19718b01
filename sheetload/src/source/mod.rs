//! Source retrieval and CSV parsing
//!
//! A [`SourceFetcher`] turns a manifest location into raw bytes; [`CsvTable`]
//! parses those bytes and carries the header row through normalization.

use async_trait::async_trait;
use thiserror::Error;

mod fetcher;
mod table;

pub use fetcher::HttpFetcher;
pub use table::CsvTable;

/// Errors raised while fetching or parsing a source
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status} fetching {location}")]
    Status { status: u16, location: String },

    #[error("Failed to read {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported location: {0}")]
    UnsupportedLocation(String),

    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed CSV: line {line} has {found} fields, expected {expected}")]
    TooManyFields { line: u64, expected: usize, found: usize },

    #[error("No columns to parse from source")]
    Empty,
}

/// Retrieves the raw contents of a source location
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError>;
}
