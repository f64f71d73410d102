//! Dashboard API types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Uniform JSON envelope for every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// GET /api/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub offers: usize,
    pub routes: usize,
    pub sources: Vec<String>,
    pub insight_provider: bool,
    pub last_collection: Option<DateTime<Utc>>,
    pub recovery_warnings: Vec<String>,
    pub uptime_secs: i64,
}

/// Optional body of POST /api/collect
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectRequest {
    /// Route strings such as "SYD-MEL"; configured routes when absent
    #[serde(default)]
    pub routes: Option<Vec<String>>,
    #[serde(default, alias = "date_from")]
    pub date_from: Option<String>,
    #[serde(default, alias = "date_to")]
    pub date_to: Option<String>,
}
