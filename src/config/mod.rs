//! Configuration management for AirDemand
//!
//! Loads from optional config files + environment variables via .env.
//! The resulting `AppConfig` is passed explicitly to each component's
//! constructor; nothing reads configuration from global state.

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::insights::MAX_TTL;
use crate::query::MAX_DEADLINE;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app: GeneralConfig,
    pub log: LogConfig,
    pub collector: CollectorConfig,
    pub store: StoreConfig,
    pub aggregator: AggregatorConfig,
    pub insights: InsightsConfig,
    pub query: QueryConfig,
    pub persistence: PersistenceConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (AIRDEMAND__*)
            .add_source(Environment::with_prefix("AIRDEMAND").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if app_config.insights.api_key.is_none() {
            app_config.insights.api_key = std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty());
        }

        app_config.validate()?;
        Ok(app_config)
    }

    /// Defaults only, no files or environment. Used by tests and embedders.
    pub fn defaults() -> Result<Self> {
        let config = Self::builder()?
            .build()
            .context("Failed to build default configuration")?;
        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize default configuration")?;
        Ok(app_config)
    }

    fn builder() -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>> {
        let builder = Config::builder()
            .set_default("app.tag", env!("CARGO_PKG_VERSION"))?
            // Logging defaults
            .set_default("log.level", "info")?
            .set_default("log.format", "pretty")?
            // Collector defaults
            .set_default(
                "collector.routes",
                vec!["SYD-MEL", "MEL-SYD", "SYD-BNE", "BNE-SYD", "MEL-BNE", "SYD-PER"],
            )?
            .set_default("collector.lookahead_days", 1)?
            .set_default("collector.window_days", 30)?
            .set_default("collector.interval_secs", 900)?
            .set_default("collector.max_concurrent_routes", 4)?
            .set_default("collector.simulated_enabled", true)?
            .set_default("collector.http_enabled", false)?
            .set_default("collector.http_base_url", "http://127.0.0.1:8081")?
            .set_default("collector.http_timeout_ms", 10_000)?
            // Store defaults
            .set_default("store.retention_days", 30)?
            // Aggregator defaults
            .set_default("aggregator.bucket_days", 1)?
            .set_default("aggregator.top_airlines", 5)?
            .set_default("aggregator.currency", "AUD")?
            // Insight defaults
            .set_default("insights.enabled", true)?
            .set_default("insights.api_base_url", "https://api.openai.com/v1")?
            .set_default("insights.model", "gpt-3.5-turbo")?
            .set_default("insights.max_tokens", 1000)?
            .set_default("insights.temperature", 0.7)?
            .set_default("insights.timeout_ms", 8_000)?
            .set_default("insights.max_retries", 2)?
            .set_default("insights.backoff_ms", 250)?
            .set_default("insights.max_concurrent_requests", 2)?
            .set_default("insights.cache_ttl_secs", 3_600)?
            .set_default("insights.fallback_ttl_secs", 60)?
            // Query defaults
            .set_default("query.deadline_ms", 15_000)?
            .set_default("query.max_offers", 500)?
            .set_default("query.max_routes", 10)?
            .set_default("query.popular_routes", 10)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.enabled", true)?
            .set_default("persistence.snapshot_interval_secs", 300)?
            // Server defaults
            .set_default("server.bind_addr", "0.0.0.0:5000")?;
        Ok(builder)
    }

    /// Reject values that would make a component misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        self.collector.route_keys()?;
        self.aggregator.currency()?;
        if self.aggregator.bucket_days == 0 {
            bail!("aggregator.bucket_days must be at least 1");
        }
        if self.collector.window_days < 1 {
            bail!("collector.window_days must be at least 1");
        }
        if self.collector.max_concurrent_routes == 0 {
            bail!("collector.max_concurrent_routes must be at least 1");
        }
        if self.insights.max_concurrent_requests == 0 {
            bail!("insights.max_concurrent_requests must be at least 1");
        }
        if self.store.retention_days < 1 {
            bail!("store.retention_days must be at least 1");
        }
        if self.query.deadline() > MAX_DEADLINE {
            bail!("query.deadline_ms must be at most {}", MAX_DEADLINE.as_millis());
        }
        if self.insights.cache_ttl() > MAX_TTL || self.insights.fallback_ttl() > MAX_TTL {
            bail!("insights cache TTLs must be at most {}s", MAX_TTL.as_secs());
        }
        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "tag={} routes={:?} window={}d interval={}s insights={} key={} bucket={}d",
            self.app.tag,
            self.collector.routes,
            self.collector.window_days,
            self.collector.interval_secs,
            self.insights.enabled,
            if self.insights.api_key.is_some() {
                "set"
            } else {
                "unset"
            },
            self.aggregator.bucket_days,
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::defaults().unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.insights.max_retries, 2);
        assert_eq!(cfg.aggregator.bucket_days, 1);
        assert_eq!(cfg.collector.route_keys().unwrap().len(), 6);
        assert_eq!(cfg.aggregator.currency().unwrap(), Currency::AUD);
    }

    #[test]
    fn bad_route_fails_validation() {
        let mut cfg = AppConfig::defaults().unwrap();
        cfg.collector.routes.push("SYDNEY".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn absurd_durations_fail_validation() {
        let mut cfg = AppConfig::defaults().unwrap();
        cfg.query.deadline_ms = u64::MAX;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::defaults().unwrap();
        cfg.insights.cache_ttl_secs = u64::MAX;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn digest_hides_secrets() {
        let mut cfg = AppConfig::defaults().unwrap();
        cfg.insights.api_key = Some("sk-secret".to_string());
        let digest = cfg.digest();
        assert!(!digest.contains("sk-secret"));
        assert!(digest.contains("key=set"));
    }
}
