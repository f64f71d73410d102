//! Query Service - Filtered market views
//!
//! Read-only composition of store, aggregator and insight generator. One
//! store snapshot backs the whole view, so offers, summaries and popularity
//! all describe the same data. Only the insight stage waits on the network
//! and it is bounded by the request deadline.

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::aggregator::{
    Aggregator, DestinationDemand, MarketStatistics, MarketSummary, RoutePopularity,
};
use crate::config::QueryConfig;
use crate::error::{AppError, Result};
use crate::insights::{InsightBundle, InsightGenerator};
use crate::store::{travel_date_span, OfferStore, StoreSnapshot};
use crate::types::{airport_code, DateRange, FlightOffer, RouteKey};

/// Validated view filters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewFilters {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl ViewFilters {
    /// Parse string key/value filters. Unknown keys are ignored and empty
    /// values count as absent.
    pub fn parse<'a, I>(params: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut filters = ViewFilters::default();
        for (key, value) in params {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key {
                "origin" => filters.origin = Some(parse_code("origin", value)?),
                "destination" => filters.destination = Some(parse_code("destination", value)?),
                "date_from" | "dateFrom" => filters.date_from = Some(parse_date(key, value)?),
                "date_to" | "dateTo" => filters.date_to = Some(parse_date(key, value)?),
                _ => {}
            }
        }

        if let (Some(from), Some(to)) = (filters.date_from, filters.date_to) {
            DateRange::new(from, to)?;
        }
        if let (Some(o), Some(d)) = (&filters.origin, &filters.destination) {
            if o == d {
                return Err(AppError::InvalidFilter(format!(
                    "origin and destination are both {o}"
                )));
            }
        }
        Ok(filters)
    }

    pub fn from_map(params: &HashMap<String, String>) -> Result<Self> {
        Self::parse(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Travel-date range, open ends filled with the calendar bounds
    pub fn travel_range(&self) -> Option<DateRange> {
        match (self.date_from, self.date_to) {
            (None, None) => None,
            (from, to) => Some(DateRange {
                from: from.unwrap_or(NaiveDate::MIN),
                to: to.unwrap_or(NaiveDate::MAX),
            }),
        }
    }

    /// The single route named by the filters, if both ends are given
    pub fn route(&self) -> Option<RouteKey> {
        match (&self.origin, &self.destination) {
            (Some(o), Some(d)) => RouteKey::new(o, d),
            _ => None,
        }
    }

    pub fn matches(&self, route: &RouteKey) -> bool {
        self.origin.as_deref().map_or(true, |o| route.origin == o)
            && self
                .destination
                .as_deref()
                .map_or(true, |d| route.destination == d)
    }
}

fn parse_code(field: &str, value: &str) -> Result<String> {
    airport_code(value).ok_or_else(|| {
        AppError::InvalidFilter(format!("{field} must be a three-letter airport code, got {value:?}"))
    })
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        AppError::InvalidFilter(format!("{field} must be a YYYY-MM-DD date, got {value:?}"))
    })
}

/// Longest deadline honoured for a single view
pub const MAX_DEADLINE: Duration = Duration::from_secs(600);

/// Destinations listed in a view's demand ranking
pub const DESTINATION_DEMAND_LIMIT: usize = 15;

fn deadline_from_now(deadline: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(deadline.min(MAX_DEADLINE))
        .unwrap_or(now)
}

/// Filtered view of the market
#[derive(Debug, Clone, Serialize)]
pub struct MarketView {
    pub filters: ViewFilters,
    /// Matching offers, capped
    pub offers: Vec<FlightOffer>,
    /// Matching offers before the cap
    pub total_offers: usize,
    /// First and last travel date among matching offers
    pub travel_span: Option<DateRange>,
    pub summaries: Vec<MarketSummary>,
    /// Insights in summary order; missing entries are listed in `omitted`
    pub insights: Vec<InsightBundle>,
    pub popular_routes: Vec<RoutePopularity>,
    /// Price distribution, coverage and data quality over matching offers
    pub statistics: MarketStatistics,
    pub demand_by_destination: Vec<DestinationDemand>,
    /// True when the deadline cut the insight stage short
    pub partial: bool,
    pub omitted: Vec<String>,
    pub warnings: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Summary and insights for one route
#[derive(Debug, Clone, Serialize)]
pub struct RouteView {
    pub summary: MarketSummary,
    pub insights: Option<InsightBundle>,
    pub partial: bool,
}

/// Limits resolved from config
#[derive(Debug, Clone, Copy)]
pub struct QuerySettings {
    pub deadline: Duration,
    pub max_offers: usize,
    pub max_routes: usize,
    pub popular_routes: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(15),
            max_offers: 500,
            max_routes: 10,
            popular_routes: 10,
        }
    }
}

impl QuerySettings {
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            deadline: config.deadline(),
            max_offers: config.max_offers,
            max_routes: config.max_routes,
            popular_routes: config.popular_routes,
        }
    }
}

pub struct QueryService {
    store: Arc<OfferStore>,
    aggregator: Arc<Aggregator>,
    insights: Arc<InsightGenerator>,
    settings: QuerySettings,
}

impl QueryService {
    pub fn new(
        store: Arc<OfferStore>,
        aggregator: Arc<Aggregator>,
        insights: Arc<InsightGenerator>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            store,
            aggregator,
            insights,
            settings,
        }
    }

    pub fn settings(&self) -> QuerySettings {
        self.settings
    }

    /// Parse raw filters and build the view
    pub async fn view_from_params(
        &self,
        params: &HashMap<String, String>,
        deadline: Option<Duration>,
    ) -> Result<MarketView> {
        let filters = ViewFilters::from_map(params)?;
        Ok(self.get_filtered_view(&filters, deadline).await)
    }

    pub async fn get_filtered_view(
        &self,
        filters: &ViewFilters,
        deadline: Option<Duration>,
    ) -> MarketView {
        let deadline_at = deadline_from_now(deadline.unwrap_or(self.settings.deadline));
        let as_of = Utc::now();
        let range = filters.travel_range();
        let snapshot = self.store.snapshot(|route| filters.matches(route));
        let mut warnings = Vec::new();

        let matching: Vec<&FlightOffer> = snapshot
            .iter(range)
            .filter(|o| o.observed_at <= as_of)
            .collect();
        let total_offers = matching.len();
        let travel_span = travel_date_span(matching.iter().copied())
            .map(|(from, to)| DateRange { from, to });
        let offers: Vec<FlightOffer> = matching
            .into_iter()
            .take(self.settings.max_offers)
            .cloned()
            .collect();
        if total_offers > offers.len() {
            warnings.push(format!(
                "Showing {} of {} matching offers",
                offers.len(),
                total_offers
            ));
        }

        let mut summaries = self.summaries(&snapshot, filters, as_of, range);
        if summaries.len() > self.settings.max_routes {
            warnings.push(format!(
                "Summarised {} of {} matching routes",
                self.settings.max_routes,
                summaries.len()
            ));
            summaries.truncate(self.settings.max_routes);
        }

        let popular_routes =
            self.aggregator
                .popular_routes(&snapshot, as_of, range, self.settings.popular_routes);
        let statistics = self.aggregator.market_statistics(&snapshot, as_of, range);
        let demand_by_destination = self.aggregator.demand_by_destination(
            &snapshot,
            as_of,
            range,
            DESTINATION_DEMAND_LIMIT,
        );

        let (insights, omitted) = self.insights_until(&summaries, deadline_at).await;
        let partial = !omitted.is_empty();
        if partial {
            warn!(omitted = omitted.len(), "Deadline reached before all insights were ready");
        }
        debug!(
            offers = offers.len(),
            total_offers,
            routes = summaries.len(),
            partial,
            "Built market view"
        );

        MarketView {
            filters: filters.clone(),
            offers,
            total_offers,
            travel_span,
            summaries,
            insights,
            popular_routes,
            statistics,
            demand_by_destination,
            partial,
            omitted,
            warnings,
            generated_at: Utc::now(),
        }
    }

    /// One summary per matching route with data. A route named explicitly by
    /// the filters is always summarised, even when empty.
    fn summaries(
        &self,
        snapshot: &StoreSnapshot,
        filters: &ViewFilters,
        as_of: DateTime<Utc>,
        range: Option<DateRange>,
    ) -> Vec<MarketSummary> {
        if let Some(route) = filters.route() {
            return vec![self.aggregator.summarize_snapshot(snapshot, &route, as_of, range)];
        }
        snapshot
            .routes()
            .map(|route| self.aggregator.summarize_snapshot(snapshot, route, as_of, range))
            .filter(|summary| !summary.is_empty())
            .collect()
    }

    /// Generate insights concurrently until `deadline_at`. Calls still running
    /// at the deadline are dropped.
    async fn insights_until(
        &self,
        summaries: &[MarketSummary],
        deadline_at: tokio::time::Instant,
    ) -> (Vec<InsightBundle>, Vec<String>) {
        let mut pending: FuturesUnordered<_> = summaries
            .iter()
            .enumerate()
            .map(|(idx, summary)| async move {
                (idx, self.insights.generate_insights(summary).await)
            })
            .collect();

        let mut done: Vec<Option<InsightBundle>> = vec![None; summaries.len()];
        loop {
            match tokio::time::timeout_at(deadline_at, pending.next()).await {
                Ok(Some((idx, bundle))) => done[idx] = Some(bundle.as_ref().clone()),
                Ok(None) => break,
                Err(_) => break,
            }
        }
        drop(pending);

        let mut insights = Vec::with_capacity(summaries.len());
        let mut omitted = Vec::new();
        for (summary, bundle) in summaries.iter().zip(done) {
            match bundle {
                Some(bundle) => insights.push(bundle),
                None => omitted.push(format!("insights for {}", summary.route)),
            }
        }
        (insights, omitted)
    }

    /// Summary plus insights for one route
    pub async fn route_view(
        &self,
        route: &RouteKey,
        range: Option<DateRange>,
        deadline: Option<Duration>,
    ) -> RouteView {
        let summary = self
            .aggregator
            .summarize_window(route, Utc::now(), range);
        let deadline_at = deadline_from_now(deadline.unwrap_or(self.settings.deadline));
        let insights =
            match tokio::time::timeout_at(deadline_at, self.insights.generate_insights(&summary)).await {
                Ok(bundle) => Some(bundle.as_ref().clone()),
                Err(_) => {
                    warn!(route = %route, "Deadline reached before insights were ready");
                    None
                }
            };
        RouteView {
            partial: insights.is_none(),
            summary,
            insights,
        }
    }

    pub fn popular_routes(&self, limit: usize) -> Vec<RoutePopularity> {
        let snapshot = self.store.snapshot_all();
        self.aggregator
            .popular_routes(&snapshot, Utc::now(), None, limit)
    }

    pub fn demand_by_destination(&self, limit: usize) -> Vec<DestinationDemand> {
        let snapshot = self.store.snapshot_all();
        self.aggregator
            .demand_by_destination(&snapshot, Utc::now(), None, limit)
    }
}
