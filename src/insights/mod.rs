//! Insight Generator - Narrative insights for market summaries
//!
//! Calls the configured language-model provider with bounded concurrency, a
//! per-attempt timeout and exponential backoff. When the provider is missing
//! or exhausted a rule-based bundle is produced instead, so callers always get
//! something to show. Bundles are cached by summary hash; the cache lock is
//! never held across a provider call.

mod cache;
mod fallback;
mod provider;

pub use cache::{InsightCache, MAX_TTL};
pub use fallback::fallback_bundle;
#[cfg(test)]
pub use provider::MockInsightProvider;
pub use provider::{InsightProvider, OpenAiProvider, ProviderInsights};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::aggregator::MarketSummary;
use crate::config::InsightsConfig;
use crate::error::{AppError, ProviderError};
use crate::types::RouteKey;

/// Upper bound on a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const BACKOFF_JITTER_RATIO: f64 = 0.2;

/// Where a bundle's text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsightSource {
    External,
    Fallback,
}

/// Insights for one market summary. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightBundle {
    /// `snapshot_hash` of the summary these insights describe
    pub summary_hash: String,
    pub route: Option<RouteKey>,
    pub demand_insights: Vec<String>,
    pub price_insights: Vec<String>,
    pub route_insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
    pub source: InsightSource,
}

impl InsightBundle {
    fn external(summary: &MarketSummary, insights: ProviderInsights) -> Self {
        Self {
            summary_hash: summary.snapshot_hash(),
            route: Some(summary.route.clone()),
            demand_insights: insights.demand_insights,
            price_insights: insights.price_insights,
            route_insights: insights.route_insights,
            recommendations: insights.recommendations,
            summary: insights.summary,
            generated_at: Utc::now(),
            source: InsightSource::External,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.demand_insights.is_empty()
            && self.price_insights.is_empty()
            && self.route_insights.is_empty()
            && self.recommendations.is_empty()
            && self.summary.is_empty()
    }
}

/// Retry, timeout and cache settings
#[derive(Debug, Clone, Copy)]
pub struct InsightSettings {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
    pub max_concurrent_requests: usize,
    pub cache_ttl: Duration,
    pub fallback_ttl: Duration,
}

impl Default for InsightSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            max_retries: 2,
            backoff: Duration::from_millis(250),
            max_concurrent_requests: 2,
            cache_ttl: Duration::from_secs(3600),
            fallback_ttl: Duration::from_secs(60),
        }
    }
}

impl InsightSettings {
    pub fn from_config(config: &InsightsConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            backoff: config.backoff(),
            max_concurrent_requests: config.max_concurrent_requests.max(1),
            cache_ttl: config.cache_ttl(),
            fallback_ttl: config.fallback_ttl(),
        }
    }
}

/// Exponential backoff for retry `attempt` (1-based) with +/- jitter
fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    let capped = attempt.saturating_sub(1).min(16);
    let bounded = base.saturating_mul(1u32 << capped).min(MAX_BACKOFF);
    let jitter = 1.0 + rand::thread_rng().gen_range(-BACKOFF_JITTER_RATIO..=BACKOFF_JITTER_RATIO);
    bounded.mul_f64(jitter)
}

pub struct InsightGenerator {
    provider: Option<Arc<dyn InsightProvider>>,
    settings: InsightSettings,
    cache: Mutex<InsightCache>,
    permits: Semaphore,
}

impl InsightGenerator {
    pub fn new(provider: Option<Arc<dyn InsightProvider>>, settings: InsightSettings) -> Self {
        Self {
            provider,
            permits: Semaphore::new(settings.max_concurrent_requests.max(1)),
            settings,
            cache: Mutex::new(InsightCache::new()),
        }
    }

    pub fn from_config(config: &InsightsConfig) -> Self {
        let provider = OpenAiProvider::from_config(config)
            .map(|p| Arc::new(p) as Arc<dyn InsightProvider>);
        if provider.is_none() {
            info!("No insight provider configured; using rule-based insights");
        }
        Self::new(provider, InsightSettings::from_config(config))
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    fn cached(&self, hash: &str) -> Option<Arc<InsightBundle>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
    }

    fn store(&self, bundle: InsightBundle) -> Arc<InsightBundle> {
        let ttl = match bundle.source {
            InsightSource::External => self.settings.cache_ttl,
            InsightSource::Fallback => self.settings.fallback_ttl,
        };
        let bundle = Arc::new(bundle);
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let purged = cache.purge_expired();
        if purged > 0 {
            debug!(purged, "Dropped expired insight bundles");
        }
        cache.put(bundle.clone(), ttl);
        bundle
    }

    /// Insights for `summary`. Never fails: provider errors end in a
    /// fallback bundle.
    pub async fn generate_insights(&self, summary: &MarketSummary) -> Arc<InsightBundle> {
        let hash = summary.snapshot_hash();
        if let Some(hit) = self.cached(&hash) {
            debug!(route = %summary.route, "Insight cache hit");
            return hit;
        }

        let bundle = match (&self.provider, summary.is_empty()) {
            (Some(provider), false) => match self.call_with_retry(provider.as_ref(), summary).await {
                Ok(insights) => InsightBundle::external(summary, insights),
                Err(e) => {
                    warn!(route = %summary.route, error = %e, "Falling back to rule-based insights");
                    fallback_bundle(summary, Utc::now())
                }
            },
            _ => fallback_bundle(summary, Utc::now()),
        };
        self.store(bundle)
    }

    async fn call_with_retry(
        &self,
        provider: &dyn InsightProvider,
        summary: &MarketSummary,
    ) -> Result<ProviderInsights, AppError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    AppError::InsightGenerationFailed {
                        attempts: attempt,
                        reason: "insight generator closed".to_string(),
                    }
                })?;
                match tokio::time::timeout(self.settings.timeout, provider.complete(summary)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(self.settings.timeout)),
                }
            };

            let err = match result {
                Ok(insights) if !insights.is_empty() => {
                    debug!(route = %summary.route, provider = provider.name(), attempt, "Insights generated");
                    return Ok(insights);
                }
                Ok(_) => ProviderError::Decode("provider returned no insights".to_string()),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt > self.settings.max_retries {
                return Err(AppError::InsightGenerationFailed {
                    attempts: attempt,
                    reason: err.to_string(),
                });
            }
            let delay = backoff_with_jitter(self.settings.backoff, attempt);
            warn!(
                route = %summary.route,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Insight request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Live cached bundles, for persistence
    pub fn cached_bundles(&self) -> Vec<InsightBundle> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .bundles()
            .into_iter()
            .map(|b| b.as_ref().clone())
            .collect()
    }

    /// Load recovered bundles. Each keeps whatever is left of its TTL
    /// measured from `generated_at`; stale ones are skipped.
    pub fn seed(&self, bundles: Vec<InsightBundle>) -> usize {
        let now = Utc::now();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let mut seeded = 0usize;
        for bundle in bundles {
            let ttl = match bundle.source {
                InsightSource::External => self.settings.cache_ttl,
                InsightSource::Fallback => self.settings.fallback_ttl,
            };
            let age = (now - bundle.generated_at).to_std().unwrap_or_default();
            let Some(remaining) = ttl.checked_sub(age).filter(|r| !r.is_zero()) else {
                continue;
            };
            cache.put(Arc::new(bundle), remaining);
            seeded += 1;
        }
        if seeded > 0 {
            info!(seeded, "Seeded insight cache from snapshot");
        }
        seeded
    }

    /// Forget cached bundles that have expired
    pub fn purge_expired(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .purge_expired()
    }
}
