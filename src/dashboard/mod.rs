//! Dashboard Module
//!
//! HTTP API over the query service and collector.
//! Only compiled when the `dashboard` feature is enabled.

mod api;
mod types;

pub use api::create_router;
pub use types::*;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::collector::{Collector, PeriodicSettings};
use crate::query::QueryService;
use crate::store::OfferStore;
use crate::types::RouteKey;

/// Shared state behind every handler
pub struct AppState {
    pub store: Arc<OfferStore>,
    pub collector: Arc<Collector>,
    pub query: Arc<QueryService>,
    /// Routes collected when a request does not name any
    pub routes: Vec<RouteKey>,
    /// Rolling window used for on-demand collection
    pub schedule: PeriodicSettings,
    pub insight_provider: bool,
    /// Warnings from startup recovery
    pub recovery_warnings: RwLock<Vec<String>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub async fn health(&self) -> HealthResponse {
        let routes = self.store.routes().len();
        HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            offers: self.store.len(),
            routes,
            sources: self.collector.source_names(),
            insight_provider: self.insight_provider,
            last_collection: self.collector.last_collection(),
            recovery_warnings: self.recovery_warnings.read().await.clone(),
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
        }
    }
}
