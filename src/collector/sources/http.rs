//! Generic JSON REST flight-data provider
//!
//! GET {base}/offers?origin=SYD&destination=MEL&dateFrom=2024-01-01&dateTo=2024-01-30
//! -> { "data": [ ProviderOffer, ... ] }

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::FlightSource;
use crate::collector::normalize::{Normalizer, ProviderOffer};
use crate::error::SourceError;
use crate::types::{Currency, DateRange, FlightOffer, RouteKey};

#[derive(Debug, Deserialize)]
struct OffersResponse {
    #[serde(default)]
    data: Vec<ProviderOffer>,
}

/// HTTP provider client
pub struct HttpFlightSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    normalizer: Normalizer,
}

impl HttpFlightSource {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        currency: Currency,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            normalizer: Normalizer::new("http", currency),
        }
    }
}

#[async_trait]
impl FlightSource for HttpFlightSource {
    fn name(&self) -> &str {
        self.normalizer.source()
    }

    async fn fetch(
        &self,
        route: &RouteKey,
        window: DateRange,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<FlightOffer>, SourceError> {
        let url = format!("{}/offers", self.base_url);
        let mut request = self.client.get(&url).query(&[
            ("origin", route.origin.clone()),
            ("destination", route.destination.clone()),
            ("dateFrom", window.from.to_string()),
            ("dateTo", window.to.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body: OffersResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        let received = body.data.len();
        let mut offers = Vec::with_capacity(received);
        for record in body.data {
            match self.normalizer.normalize(record, route, observed_at) {
                Ok(offer) => offers.push(offer),
                Err(e) => warn!(route = %route, error = %e, "Dropping provider record"),
            }
        }
        debug!(route = %route, received, kept = offers.len(), "Fetched provider offers");
        Ok(offers)
    }
}
