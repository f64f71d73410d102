//! Flight-data source implementations (HTTP provider, simulated)

mod http;
mod simulated;

pub use http::HttpFlightSource;
pub use simulated::SimulatedSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::CollectorConfig;
use crate::error::SourceError;
use crate::types::{Currency, DateRange, FlightOffer, RouteKey};

/// Trait for flight-data sources
#[async_trait]
pub trait FlightSource: Send + Sync {
    /// Get the source name
    fn name(&self) -> &str;

    /// Fetch normalised offers for one route over a travel-date window.
    /// `observed_at` stamps quotes the provider does not timestamp itself.
    async fn fetch(
        &self,
        route: &RouteKey,
        window: DateRange,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<FlightOffer>, SourceError>;
}

/// Build the sources enabled in config
pub fn from_config(config: &CollectorConfig, currency: Currency) -> Vec<Arc<dyn FlightSource>> {
    let mut sources: Vec<Arc<dyn FlightSource>> = Vec::new();
    if config.http_enabled {
        sources.push(Arc::new(HttpFlightSource::new(
            &config.http_base_url,
            config.http_api_key.clone(),
            config.http_timeout(),
            currency,
        )));
    }
    if config.simulated_enabled {
        sources.push(Arc::new(SimulatedSource::new(currency)));
    }
    sources
}
