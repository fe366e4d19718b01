//! Warehouse error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur talking to the warehouse
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to read credentials from {}: {message}", path.display())]
    Credentials { path: PathBuf, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Load job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WarehouseError {
    /// Check if the requested resource does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            WarehouseError::NotFound(_) => true,
            WarehouseError::ApiError { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Check if the sink refused the request for lack of permission
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, WarehouseError::ApiError { status: 401 | 403, .. })
    }
}
