//! Configuration sections
//!
//! One struct per top-level key of the config file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::types::{Currency, RouteKey};

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Version tag for logging
    pub tag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Routes to collect, e.g. ["SYD-MEL", "MEL-SYD"]
    pub routes: Vec<String>,
    /// Days between today and the first travel date collected
    pub lookahead_days: i64,
    /// Number of travel dates collected per run
    pub window_days: i64,
    /// Scheduled collection interval in seconds (0 disables the schedule)
    pub interval_secs: u64,
    /// Maximum routes fetched in parallel
    pub max_concurrent_routes: usize,
    /// Enable the offline simulated source
    pub simulated_enabled: bool,
    /// Enable the HTTP provider source
    pub http_enabled: bool,
    /// Provider base URL
    pub http_base_url: String,
    /// Provider bearer key (optional)
    pub http_api_key: Option<String>,
    /// Per-request timeout in milliseconds
    pub http_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Offers observed longer ago than this are evictable
    pub retention_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Price trend bucket width in days
    pub bucket_days: u32,
    /// Number of airlines reported per summary
    pub top_airlines: usize,
    /// Currency price metrics are computed in
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsightsConfig {
    /// Call the external provider at all
    pub enabled: bool,
    /// OpenAI-compatible API base URL
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First retry delay in milliseconds, doubled each retry
    pub backoff_ms: u64,
    pub max_concurrent_requests: usize,
    pub cache_ttl_secs: u64,
    pub fallback_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Overall request deadline in milliseconds
    pub deadline_ms: u64,
    /// Maximum offers returned in a view
    pub max_offers: usize,
    /// Maximum route summaries (and insight calls) per view
    pub max_routes: usize,
    /// Popular routes listed per view
    pub popular_routes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Enable snapshot files
    pub enabled: bool,
    /// Snapshot interval in seconds
    pub snapshot_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl CollectorConfig {
    pub fn route_keys(&self) -> Result<Vec<RouteKey>> {
        self.routes
            .iter()
            .map(|raw| {
                RouteKey::parse(raw).with_context(|| format!("Invalid route in config: {raw}"))
            })
            .collect()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

impl AggregatorConfig {
    pub fn currency(&self) -> Result<Currency> {
        Currency::from_code(&self.currency)
            .with_context(|| format!("Unsupported currency: {}", self.currency))
    }
}

impl InsightsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn fallback_ttl(&self) -> Duration {
        Duration::from_secs(self.fallback_ttl_secs)
    }
}

impl QueryConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}
