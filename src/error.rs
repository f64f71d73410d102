//! Error taxonomy
//!
//! Domain failures are typed so callers can tell a bad query from a flaky
//! provider. Application plumbing (startup, config, file I/O) uses `anyhow`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Every requested route failed to collect
    #[error("Source unavailable for {} route(s): {}", failed.len(), failed.join(", "))]
    SourceUnavailable { failed: Vec<String> },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Insight generation failed after {attempts} attempt(s): {reason}")]
    InsightGenerationFailed { attempts: u32, reason: String },

    #[error("Store snapshot {path} is corrupt: {reason}")]
    StoreCorruption { path: PathBuf, reason: String },
}

impl AppError {
    /// Client errors are reported as 4xx by the HTTP layer
    pub fn is_client_error(&self) -> bool {
        matches!(self, AppError::InvalidFilter(_))
    }
}

/// Failure of a single flight-data source for a single route
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {0}")]
    Status(u16),

    #[error("Malformed provider payload: {0}")]
    Decode(String),

    #[error("Offer rejected during normalisation: {0}")]
    Normalize(String),
}

/// Failure of one call to the language-model provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout(_) | ProviderError::Http(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Decode(_) => false,
        }
    }
}
