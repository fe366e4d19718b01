//! Service-account authentication
//!
//! Exchanges a signed JWT assertion for an OAuth2 access token and caches the
//! token until shortly before it expires.

use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::WarehouseError;

/// OAuth scope for BigQuery
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime accepted by the token endpoint
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh this long before the token actually expires
const EXPIRY_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Fields of a service-account JSON key file
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("key_type", &self.key_type)
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Read and parse a key file
    pub fn from_file(path: &Path) -> Result<Self, WarehouseError> {
        debug!(?path, "ServiceAccountKey::from_file: called");
        let content = std::fs::read_to_string(path).map_err(|e| WarehouseError::Credentials {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|e| WarehouseError::Credentials {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn from_json(content: &str) -> Result<Self, WarehouseError> {
        let key: Self = serde_json::from_str(content)?;
        if key.key_type != "service_account" {
            return Err(WarehouseError::Auth(format!(
                "Expected a service_account key, got '{}'",
                key.key_type
            )));
        }
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Issues bearer tokens for warehouse requests
pub struct TokenProvider {
    key: ServiceAccountKey,
    scope: String,
    http: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(key: ServiceAccountKey, http: Client) -> Self {
        debug!(client_email = %key.client_email, "TokenProvider::new: called");
        Self {
            key,
            scope: BIGQUERY_SCOPE.to_string(),
            http,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid access token, exchanging a new assertion if needed
    pub async fn access_token(&self) -> Result<String, WarehouseError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref()
            && token.expires_at > now
        {
            debug!("TokenProvider::access_token: using cached token");
            return Ok(token.value.clone());
        }

        debug!("TokenProvider::access_token: exchanging assertion");
        let assertion = self.signed_assertion(now)?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!(%status, "TokenProvider::access_token: token endpoint error");
            return Err(WarehouseError::Auth(format!("Token endpoint returned {}: {}", status, text)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| WarehouseError::InvalidResponse(format!("Token response: {}", e)))?;
        let lifetime = token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        let expires_at = now + ChronoDuration::seconds((lifetime - EXPIRY_MARGIN_SECS).max(0));

        info!(client_email = %self.key.client_email, "Obtained warehouse access token");
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    /// Build the RS256-signed JWT sent to the token endpoint
    fn signed_assertion(&self, now: DateTime<Utc>) -> Result<String, WarehouseError> {
        let iat = now.timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| WarehouseError::Auth(format!("Invalid private key: {}", e)))?;

        jsonwebtoken::encode(&header, &claims, &encoding_key)
            .map_err(|e| WarehouseError::Auth(format!("Failed to sign assertion: {}", e)))
    }
}
