//! Market Aggregator - Derives market summaries from stored offers
//!
//! A summary is a pure function of the offer snapshot it was computed from
//! and the aggregator settings: bucketing uses ordered maps, prices stay in
//! decimal, and every mean is rounded the same way.

mod stats;
mod trend;

pub use stats::{
    compute_statistics, demand_by_destination, price_distribution, DataQuality,
    DestinationDemand, MarketStatistics, PriceDistribution, RouteAnalysis,
};
pub use trend::{bucket_start, change_pct, TrendBuilder, TrendPoint};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AggregatorConfig;
use crate::store::{OfferStore, StoreSnapshot};
use crate::types::{Currency, DateRange, FlightOffer, RouteKey};

/// Airline ranked by offer count within a market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirlineRank {
    pub airline: String,
    pub offers: usize,
    pub average_price: Decimal,
}

/// Derived view of one market. Never stored as source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub route: RouteKey,
    pub as_of: DateTime<Utc>,
    /// Travel-date window the summary was restricted to
    pub window: Option<DateRange>,
    pub currency: Currency,
    pub offer_count: usize,
    /// Offers skipped because they were priced in another currency
    pub excluded_offers: usize,
    pub average_price: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub price_trend: Vec<TrendPoint>,
    pub total_observed_demand: u64,
    pub average_demand: Decimal,
    pub top_airlines: Vec<AirlineRank>,
}

/// Hashed fields of a summary. `as_of` is left out so that identical metrics
/// computed at different times share cached insights.
#[derive(Serialize)]
struct SummaryContent<'a> {
    route: &'a RouteKey,
    window: &'a Option<DateRange>,
    currency: Currency,
    offer_count: usize,
    excluded_offers: usize,
    average_price: &'a Decimal,
    min_price: &'a Decimal,
    max_price: &'a Decimal,
    price_trend: &'a [TrendPoint],
    total_observed_demand: u64,
    average_demand: &'a Decimal,
    top_airlines: &'a [AirlineRank],
}

impl MarketSummary {
    /// Zeroed summary for a market with no offers
    pub fn empty(
        route: RouteKey,
        as_of: DateTime<Utc>,
        window: Option<DateRange>,
        currency: Currency,
    ) -> Self {
        Self {
            route,
            as_of,
            window,
            currency,
            offer_count: 0,
            excluded_offers: 0,
            average_price: Decimal::ZERO,
            min_price: Decimal::ZERO,
            max_price: Decimal::ZERO,
            price_trend: Vec::new(),
            total_observed_demand: 0,
            average_demand: Decimal::ZERO,
            top_airlines: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.offer_count == 0
    }

    /// Content hash (sha256, hex) identifying this summary's metrics
    pub fn snapshot_hash(&self) -> String {
        let content = SummaryContent {
            route: &self.route,
            window: &self.window,
            currency: self.currency,
            offer_count: self.offer_count,
            excluded_offers: self.excluded_offers,
            average_price: &self.average_price,
            min_price: &self.min_price,
            max_price: &self.max_price,
            price_trend: &self.price_trend,
            total_observed_demand: self.total_observed_demand,
            average_demand: &self.average_demand,
            top_airlines: &self.top_airlines,
        };
        let bytes = serde_json::to_vec(&content).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

/// Route ranked by mean demand score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePopularity {
    pub route: RouteKey,
    pub average_demand: Decimal,
    pub offer_count: usize,
}

/// Aggregation settings resolved from config
#[derive(Debug, Clone, Copy)]
pub struct AggregatorSettings {
    pub bucket_days: u32,
    pub top_airlines: usize,
    pub currency: Currency,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            bucket_days: 1,
            top_airlines: 5,
            currency: Currency::AUD,
        }
    }
}

impl AggregatorSettings {
    pub fn from_config(config: &AggregatorConfig) -> Result<Self> {
        Ok(Self {
            bucket_days: config.bucket_days.max(1),
            top_airlines: config.top_airlines,
            currency: config.currency()?,
        })
    }
}

/// Computes summaries over the offer store
pub struct Aggregator {
    store: Arc<OfferStore>,
    settings: AggregatorSettings,
}

impl Aggregator {
    pub fn new(store: Arc<OfferStore>, settings: AggregatorSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> AggregatorSettings {
        self.settings
    }

    /// Summary of all offers for `route` observed at or before `as_of`
    pub fn summarize(&self, route: &RouteKey, as_of: DateTime<Utc>) -> MarketSummary {
        self.summarize_window(route, as_of, None)
    }

    /// Like [`summarize`](Self::summarize), restricted to travel dates in `window`
    pub fn summarize_window(
        &self,
        route: &RouteKey,
        as_of: DateTime<Utc>,
        window: Option<DateRange>,
    ) -> MarketSummary {
        let snapshot = self.store.snapshot_route(route);
        self.summarize_snapshot(&snapshot, route, as_of, window)
    }

    /// Summary over an already captured snapshot
    pub fn summarize_snapshot(
        &self,
        snapshot: &StoreSnapshot,
        route: &RouteKey,
        as_of: DateTime<Utc>,
        window: Option<DateRange>,
    ) -> MarketSummary {
        compute_summary(
            &self.settings,
            route,
            as_of,
            window,
            snapshot.route_offers(route, window),
        )
    }

    /// One summary per route currently in the store
    pub fn summarize_all(&self, as_of: DateTime<Utc>) -> Vec<MarketSummary> {
        let snapshot = self.store.snapshot_all();
        snapshot
            .routes()
            .map(|route| self.summarize_snapshot(&snapshot, route, as_of, None))
            .collect()
    }

    /// Routes ranked by mean demand, highest first. Ties break on route text.
    pub fn popular_routes(
        &self,
        snapshot: &StoreSnapshot,
        as_of: DateTime<Utc>,
        window: Option<DateRange>,
        limit: usize,
    ) -> Vec<RoutePopularity> {
        let mut ranked: Vec<RoutePopularity> = snapshot
            .routes()
            .filter_map(|route| {
                let (sum, count) = snapshot
                    .route_offers(route, window)
                    .filter(|o| o.observed_at <= as_of)
                    .fold((0u64, 0usize), |(sum, count), o| {
                        (sum + o.demand_score as u64, count + 1)
                    });
                (count > 0).then(|| RoutePopularity {
                    route: route.clone(),
                    average_demand: (Decimal::from(sum) / Decimal::from(count as u64))
                        .round_dp(1),
                    offer_count: count,
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.average_demand
                .cmp(&a.average_demand)
                .then_with(|| a.route.cmp(&b.route))
        });
        ranked.truncate(limit);
        ranked
    }

    /// Cross-route statistics over the snapshot offers observed by `as_of`
    pub fn market_statistics(
        &self,
        snapshot: &StoreSnapshot,
        as_of: DateTime<Utc>,
        window: Option<DateRange>,
    ) -> MarketStatistics {
        compute_statistics(
            snapshot.iter(window).filter(|o| o.observed_at <= as_of),
            self.settings.currency,
        )
    }

    /// Destinations ranked by mean demand across every route into them
    pub fn demand_by_destination(
        &self,
        snapshot: &StoreSnapshot,
        as_of: DateTime<Utc>,
        window: Option<DateRange>,
        limit: usize,
    ) -> Vec<DestinationDemand> {
        demand_by_destination(
            snapshot.iter(window).filter(|o| o.observed_at <= as_of),
            limit,
        )
    }
}

#[derive(Default)]
struct AirlineTally {
    offers: usize,
    price_sum: Decimal,
    priced: usize,
}

/// Pure summary computation over a set of offers for one route
pub fn compute_summary<'a, I>(
    settings: &AggregatorSettings,
    route: &RouteKey,
    as_of: DateTime<Utc>,
    window: Option<DateRange>,
    offers: I,
) -> MarketSummary
where
    I: IntoIterator<Item = &'a FlightOffer>,
{
    let mut summary = MarketSummary::empty(route.clone(), as_of, window, settings.currency);
    let mut trend = TrendBuilder::new(settings.bucket_days);
    let mut airlines: BTreeMap<&str, AirlineTally> = BTreeMap::new();
    let mut price_sum = Decimal::ZERO;
    let mut priced = 0usize;
    let mut min_price: Option<Decimal> = None;
    let mut max_price: Option<Decimal> = None;

    for offer in offers {
        if offer.route != *route || offer.observed_at > as_of {
            continue;
        }
        if let Some(window) = window {
            if !window.contains(offer.travel_date) {
                continue;
            }
        }

        summary.offer_count += 1;
        summary.total_observed_demand += offer.demand_score as u64;
        let tally = airlines.entry(offer.airline.as_str()).or_default();
        tally.offers += 1;

        if offer.price.currency != settings.currency {
            summary.excluded_offers += 1;
            continue;
        }
        let amount = offer.price.amount;
        price_sum += amount;
        priced += 1;
        tally.price_sum += amount;
        tally.priced += 1;
        trend.add(offer.travel_date, amount);
        min_price = Some(min_price.map_or(amount, |m| m.min(amount)));
        max_price = Some(max_price.map_or(amount, |m| m.max(amount)));
    }

    if summary.offer_count == 0 {
        return summary;
    }

    summary.average_price = trend::mean(price_sum, priced);
    summary.min_price = min_price.unwrap_or(Decimal::ZERO);
    summary.max_price = max_price.unwrap_or(Decimal::ZERO);
    summary.price_trend = trend.finish();
    summary.average_demand = (Decimal::from(summary.total_observed_demand)
        / Decimal::from(summary.offer_count as u64))
    .round_dp(1);

    let mut ranked: Vec<AirlineRank> = airlines
        .into_iter()
        .map(|(airline, tally)| AirlineRank {
            airline: airline.to_string(),
            offers: tally.offers,
            average_price: trend::mean(tally.price_sum, tally.priced),
        })
        .collect();
    // BTreeMap iteration already yields lexical order; a stable sort keeps it for ties.
    ranked.sort_by(|a, b| b.offers.cmp(&a.offers));
    ranked.truncate(settings.top_airlines);
    summary.top_airlines = ranked;

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Price;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal_macros::dec;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn offer(route: &RouteKey, day: u32, airline: &str, price: Decimal, demand: u32) -> FlightOffer {
        FlightOffer {
            route: route.clone(),
            observed_at: at(0),
            travel_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            airline: airline.to_string(),
            price: Price::new(price, Currency::AUD),
            demand_score: demand,
            stops: None,
            cabin: None,
            seats_available: None,
            source: "test".to_string(),
        }
    }

    fn setup() -> (Arc<OfferStore>, Aggregator, RouteKey) {
        let store = Arc::new(OfferStore::new());
        let aggregator = Aggregator::new(store.clone(), AggregatorSettings::default());
        (store, aggregator, RouteKey::new("SYD", "MEL").unwrap())
    }

    #[test]
    fn summary_of_three_days() {
        let (store, aggregator, route) = setup();
        store.put(vec![
            offer(&route, 1, "Qantas", dec!(100), 60),
            offer(&route, 2, "Qantas", dec!(120), 70),
            offer(&route, 3, "Qantas", dec!(110), 80),
        ]);

        let summary = aggregator.summarize(&route, at(12));
        assert_eq!(summary.average_price, dec!(110));
        let trend: Vec<(u32, Decimal)> = summary
            .price_trend
            .iter()
            .map(|p| (chrono::Datelike::day(&p.date), p.price))
            .collect();
        assert_eq!(trend, vec![(1, dec!(100)), (2, dec!(120)), (3, dec!(110))]);
        assert_eq!(summary.total_observed_demand, 210);
        assert_eq!(summary.min_price, dec!(100));
        assert_eq!(summary.max_price, dec!(120));
    }

    #[test]
    fn summarize_is_deterministic() {
        let (store, aggregator, route) = setup();
        store.put(vec![
            offer(&route, 1, "Jetstar", dec!(99.99), 40),
            offer(&route, 1, "Qantas", dec!(150.10), 90),
            offer(&route, 2, "Virgin Australia", dec!(130.05), 75),
        ]);

        let snapshot = store.snapshot_route(&route);
        let a = aggregator.summarize_snapshot(&snapshot, &route, at(6), None);
        let b = aggregator.summarize_snapshot(&snapshot, &route, at(6), None);
        assert_eq!(a, b);
        assert_eq!(a.snapshot_hash(), b.snapshot_hash());
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn empty_route_yields_zeroed_summary() {
        let (_store, aggregator, route) = setup();
        let summary = aggregator.summarize(&route, at(0));
        assert!(summary.is_empty());
        assert_eq!(summary.average_price, Decimal::ZERO);
        assert!(summary.top_airlines.is_empty());
        assert!(summary.price_trend.is_empty());
        assert_eq!(summary.total_observed_demand, 0);
    }

    #[test]
    fn top_airline_ties_break_lexically() {
        let (store, aggregator, route) = setup();
        store.put(vec![
            offer(&route, 1, "Virgin Australia", dec!(100), 50),
            offer(&route, 2, "Jetstar", dec!(100), 50),
            offer(&route, 3, "Qantas", dec!(100), 50),
            offer(&route, 4, "Qantas", dec!(100), 50),
        ]);
        let summary = aggregator.summarize(&route, at(1));
        let names: Vec<&str> = summary.top_airlines.iter().map(|a| a.airline.as_str()).collect();
        assert_eq!(names, vec!["Qantas", "Jetstar", "Virgin Australia"]);
    }

    #[test]
    fn later_observations_and_other_currencies_are_excluded() {
        let (store, aggregator, route) = setup();
        let mut late = offer(&route, 1, "Qantas", dec!(500), 10);
        late.observed_at = at(20);
        let mut usd = offer(&route, 2, "Qantas", dec!(80), 10);
        usd.price.currency = Currency::USD;
        store.put(vec![offer(&route, 1, "Jetstar", dec!(100), 10), late, usd]);

        let summary = aggregator.summarize(&route, at(10));
        assert_eq!(summary.offer_count, 2);
        assert_eq!(summary.excluded_offers, 1);
        assert_eq!(summary.average_price, dec!(100));
        assert_eq!(summary.price_trend.len(), 1);
    }

    #[test]
    fn window_restricts_travel_dates() {
        let (store, aggregator, route) = setup();
        store.put(vec![
            offer(&route, 1, "Qantas", dec!(100), 10),
            offer(&route, 5, "Qantas", dec!(300), 10),
        ]);
        let window = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 6).unwrap(),
        )
        .unwrap();
        let summary = aggregator.summarize_window(&route, at(1), Some(window));
        assert_eq!(summary.offer_count, 1);
        assert_eq!(summary.average_price, dec!(300));
        assert_ne!(
            summary.snapshot_hash(),
            aggregator.summarize(&route, at(1)).snapshot_hash()
        );
    }

    #[test]
    fn hash_ignores_as_of() {
        let (store, aggregator, route) = setup();
        store.put(vec![offer(&route, 1, "Qantas", dec!(100), 10)]);
        let a = aggregator.summarize(&route, at(1));
        let b = aggregator.summarize(&route, at(2));
        assert_ne!(a.as_of, b.as_of);
        assert_eq!(a.snapshot_hash(), b.snapshot_hash());
    }

    #[test]
    fn popular_routes_rank_by_demand() {
        let (store, aggregator, route) = setup();
        let other = RouteKey::new("SYD", "BNE").unwrap();
        let third = RouteKey::new("MEL", "PER").unwrap();
        store.put(vec![
            offer(&route, 1, "Qantas", dec!(100), 40),
            offer(&other, 1, "Qantas", dec!(100), 90),
            offer(&third, 1, "Qantas", dec!(100), 40),
        ]);
        let snapshot = store.snapshot_all();
        let ranked = aggregator.popular_routes(&snapshot, at(1), None, 10);
        let order: Vec<String> = ranked.iter().map(|r| r.route.to_string()).collect();
        assert_eq!(order, vec!["SYD-BNE", "MEL-PER", "SYD-MEL"]);
        assert_eq!(aggregator.popular_routes(&snapshot, at(1), None, 1).len(), 1);
    }

    #[test]
    fn market_statistics_skip_later_observations() {
        let (store, aggregator, route) = setup();
        let other = RouteKey::new("SYD", "BNE").unwrap();
        let mut late = offer(&RouteKey::new("MEL", "PER").unwrap(), 9, "Qantas", dec!(900), 99);
        late.observed_at = at(20);
        store.put(vec![
            offer(&route, 1, "Qantas", dec!(100), 40),
            offer(&other, 3, "Jetstar", dec!(200), 90),
            late,
        ]);
        let snapshot = store.snapshot_all();

        let stats = aggregator.market_statistics(&snapshot, at(10), None);
        assert_eq!(stats.offer_count, 2);
        assert_eq!(stats.price_distribution.unwrap().mean, dec!(150));
        assert_eq!(stats.route_analysis.total_routes, 2);
        assert_eq!(stats.route_analysis.most_frequent, Some(other));
        assert_eq!(stats.data_span_days, 2);
        // stops, cabin and seats are unset on both offers
        assert_eq!(stats.data_quality.quality_score, 94);
        assert_eq!(stats.data_quality.completeness, dec!(70));

        let demand = aggregator.demand_by_destination(&snapshot, at(10), None, 15);
        let order: Vec<&str> = demand.iter().map(|d| d.destination.as_str()).collect();
        assert_eq!(order, vec!["BNE", "MEL"]);
    }
}
