//! Offer Collector - Fetches flight offers from sources into the store
//!
//! Routes are collected in parallel up to a fixed limit. Two runs touching the
//! same route never interleave: each route has its own async mutex, taken
//! before a concurrency permit so a waiting run does not hold a permit.

mod normalize;
pub mod sources;

pub use normalize::{Normalizer, ProviderOffer, DEFAULT_DEMAND};
pub use sources::{FlightSource, HttpFlightSource, SimulatedSource};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, Semaphore};
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::error::{AppError, Result};
use crate::store::{OfferStore, PutStats};
use crate::types::{Currency, DateRange, RouteKey};

/// One source failing for one route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteFailure {
    pub route: RouteKey,
    pub source: String,
    pub reason: String,
}

/// Outcome of a collection run
#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub started_at: DateTime<Utc>,
    pub window: DateRange,
    /// Routes where at least one source succeeded
    pub routes_ok: Vec<RouteKey>,
    pub failures: Vec<RouteFailure>,
    /// Offers returned by sources inside the window
    pub fetched: usize,
    /// New offers stored after dedup
    pub inserted: usize,
    pub duplicates: usize,
    pub conflicts: usize,
}

impl CollectionReport {
    fn new(started_at: DateTime<Utc>, window: DateRange) -> Self {
        Self {
            started_at,
            window,
            routes_ok: Vec::new(),
            failures: Vec::new(),
            fetched: 0,
            inserted: 0,
            duplicates: 0,
            conflicts: 0,
        }
    }
}

struct RouteOutcome {
    route: RouteKey,
    ok: bool,
    fetched: usize,
    stats: PutStats,
    failures: Vec<RouteFailure>,
}

/// Schedule for [`Collector::run_periodic`]
#[derive(Debug, Clone, Copy)]
pub struct PeriodicSettings {
    pub interval: Duration,
    pub lookahead_days: i64,
    pub window_days: i64,
    pub retention_days: i64,
}

impl PeriodicSettings {
    pub fn from_config(config: &CollectorConfig, retention_days: i64) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            lookahead_days: config.lookahead_days,
            window_days: config.window_days,
            retention_days,
        }
    }

    /// Travel-date window for a run starting at `now`
    pub fn window_at(&self, now: DateTime<Utc>) -> DateRange {
        DateRange::rolling(now.date_naive(), self.lookahead_days, self.window_days)
    }
}

/// Collects offers from every configured source
pub struct Collector {
    store: Arc<OfferStore>,
    sources: Vec<Arc<dyn FlightSource>>,
    route_locks: Mutex<HashMap<RouteKey, Arc<AsyncMutex<()>>>>,
    permits: Arc<Semaphore>,
    last_run: RwLock<Option<DateTime<Utc>>>,
}

impl Collector {
    pub fn new(
        store: Arc<OfferStore>,
        sources: Vec<Arc<dyn FlightSource>>,
        max_concurrent_routes: usize,
    ) -> Self {
        Self {
            store,
            sources,
            route_locks: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent_routes.max(1))),
            last_run: RwLock::new(None),
        }
    }

    pub fn from_config(store: Arc<OfferStore>, config: &CollectorConfig, currency: Currency) -> Self {
        let sources = sources::from_config(config, currency);
        if sources.is_empty() {
            warn!("No flight sources enabled; collection will always fail");
        }
        Self::new(store, sources, config.max_concurrent_routes)
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Finish time of the most recent collection run
    pub fn last_collection(&self) -> Option<DateTime<Utc>> {
        *self.last_run.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn route_lock(&self, route: &RouteKey) -> Arc<AsyncMutex<()>> {
        self.route_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(route.clone())
            .or_default()
            .clone()
    }

    /// Collect `routes` over `window` into the store.
    ///
    /// Fails with `SourceUnavailable` only when every route failed; otherwise
    /// per-route failures are listed in the report.
    pub async fn collect(&self, routes: &[RouteKey], window: DateRange) -> Result<CollectionReport> {
        let started_at = Utc::now();
        let mut report = CollectionReport::new(started_at, window);
        if routes.is_empty() {
            return Ok(report);
        }

        let mut pending: FuturesUnordered<_> = routes
            .iter()
            .map(|route| self.collect_route(route, window, started_at))
            .collect();

        let mut failed_routes = Vec::new();
        while let Some(outcome) = pending.next().await {
            report.fetched += outcome.fetched;
            report.inserted += outcome.stats.inserted;
            report.duplicates += outcome.stats.duplicates;
            report.conflicts += outcome.stats.conflicts;
            report.failures.extend(outcome.failures);
            if outcome.ok {
                report.routes_ok.push(outcome.route);
            } else {
                failed_routes.push(outcome.route);
            }
        }
        report.routes_ok.sort();
        report.failures.sort_by(|a, b| {
            a.route
                .cmp(&b.route)
                .then_with(|| a.source.cmp(&b.source))
        });
        *self.last_run.write().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());

        if report.routes_ok.is_empty() {
            failed_routes.sort();
            failed_routes.dedup();
            warn!(routes = failed_routes.len(), "Collection failed for every route");
            return Err(AppError::SourceUnavailable {
                failed: failed_routes.iter().map(ToString::to_string).collect(),
            });
        }

        info!(
            routes_ok = report.routes_ok.len(),
            failures = report.failures.len(),
            fetched = report.fetched,
            inserted = report.inserted,
            duplicates = report.duplicates,
            window = %window,
            "Collection complete"
        );
        Ok(report)
    }

    async fn collect_route(
        &self,
        route: &RouteKey,
        window: DateRange,
        observed_at: DateTime<Utc>,
    ) -> RouteOutcome {
        let lock = self.route_lock(route);
        let _route_guard = lock.lock().await;
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return RouteOutcome {
                    route: route.clone(),
                    ok: false,
                    fetched: 0,
                    stats: PutStats::default(),
                    failures: vec![RouteFailure {
                        route: route.clone(),
                        source: "collector".to_string(),
                        reason: "collector is shutting down".to_string(),
                    }],
                };
            }
        };

        let results = join_all(
            self.sources
                .iter()
                .map(|source| source.fetch(route, window, observed_at)),
        )
        .await;

        let mut offers = Vec::new();
        let mut failures = Vec::new();
        let mut ok = false;
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(batch) => {
                    ok = true;
                    offers.extend(batch.into_iter().filter(|o| window.contains(o.travel_date)));
                }
                Err(e) => {
                    warn!(route = %route, source = %source.name(), error = %e, "Source fetch failed");
                    failures.push(RouteFailure {
                        route: route.clone(),
                        source: source.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        if self.sources.is_empty() {
            failures.push(RouteFailure {
                route: route.clone(),
                source: "collector".to_string(),
                reason: "no sources configured".to_string(),
            });
        }

        let fetched = offers.len();
        let stats = self.store.put(offers);
        debug!(route = %route, fetched, inserted = stats.inserted, "Route collected");

        RouteOutcome {
            route: route.clone(),
            ok,
            fetched,
            stats,
            failures,
        }
    }

    /// Scheduled collection over a rolling window until `shutdown` flips to
    /// true. Each cycle also evicts offers past the retention horizon.
    pub async fn run_periodic(
        self: Arc<Self>,
        routes: Vec<RouteKey>,
        settings: PeriodicSettings,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if settings.interval.is_zero() {
            info!("Scheduled collection disabled");
            return;
        }
        let mut ticker = tokio::time::interval(settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            routes = routes.len(),
            interval_secs = settings.interval.as_secs(),
            "Scheduled collection started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let window = settings.window_at(now);
                    if let Err(e) = self.collect(&routes, window).await {
                        warn!(error = %e, "Scheduled collection failed");
                    }
                    let cutoff = now - ChronoDuration::days(settings.retention_days);
                    self.store.evict_older_than(cutoff);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduled collection stopped");
    }
}
