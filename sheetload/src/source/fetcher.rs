//! HTTP and filesystem fetcher

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{FetchError, SourceFetcher};
use crate::config::FetchConfig;

/// Fetches `http(s)://` URLs with reqwest and `file://` URLs or bare paths
/// from the local filesystem
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn from_config(config: &FetchConfig) -> Result<Self, FetchError> {
        debug!(?config, "HttpFetcher::from_config: called");
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { http })
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        debug!(%url, "HttpFetcher::fetch_http: sending request");
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            debug!(%status, "HttpFetcher::fetch_http: HTTP error status");
            return Err(FetchError::Status {
                status: status.as_u16(),
                location: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        debug!(body_len = body.len(), "HttpFetcher::fetch_http: body read");
        Ok(body.to_vec())
    }

    async fn fetch_file(&self, location: &str, path: PathBuf) -> Result<Vec<u8>, FetchError> {
        debug!(?path, "HttpFetcher::fetch_file: reading");
        tokio::fs::read(&path).await.map_err(|source| FetchError::Io {
            location: location.to_string(),
            source,
        })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        match classify(location)? {
            Location::Http => self.fetch_http(location).await,
            Location::File(path) => self.fetch_file(location, path).await,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Location {
    Http,
    File(PathBuf),
}

fn classify(location: &str) -> Result<Location, FetchError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Location::Http)
    } else if let Some(path) = location.strip_prefix("file://") {
        Ok(Location::File(PathBuf::from(path)))
    } else if location.contains("://") {
        Err(FetchError::UnsupportedLocation(location.to_string()))
    } else {
        Ok(Location::File(PathBuf::from(location)))
    }
}
