//! End-to-end pipeline tests: collect -> store -> aggregate -> insights -> view

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use airdemand::aggregator::{Aggregator, AggregatorSettings, MarketSummary};
use airdemand::collector::{Collector, FlightSource};
use airdemand::error::{ProviderError, SourceError};
use airdemand::insights::{
    InsightGenerator, InsightProvider, InsightSettings, InsightSource, ProviderInsights,
};
use airdemand::query::{QuerySettings, QueryService, ViewFilters};
use airdemand::store::OfferStore;
use airdemand::types::{Currency, DateRange, FlightOffer, Price, RouteKey};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn jan(from: u32, to: u32) -> DateRange {
    DateRange::new(day(from), day(to)).unwrap()
}

fn route(s: &str) -> RouteKey {
    RouteKey::parse(s).unwrap()
}

fn offer(route: &RouteKey, date: NaiveDate, airline: &str, price: Decimal, at: DateTime<Utc>) -> FlightOffer {
    FlightOffer {
        route: route.clone(),
        observed_at: at,
        travel_date: date,
        airline: airline.to_string(),
        price: Price::new(price, Currency::AUD),
        demand_score: 65,
        stops: Some(0),
        cabin: None,
        seats_available: None,
        source: "fixture".to_string(),
    }
}

/// Quotes fixed prices per travel date
struct FixtureSource {
    prices: HashMap<NaiveDate, Decimal>,
}

#[async_trait]
impl FlightSource for FixtureSource {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn fetch(
        &self,
        route: &RouteKey,
        window: DateRange,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<FlightOffer>, SourceError> {
        Ok(window
            .dates()
            .filter_map(|date| {
                self.prices
                    .get(&date)
                    .map(|price| offer(route, date, "Qantas", *price, observed_at))
            })
            .collect())
    }
}

/// Records how many fetches overlap, per route and overall
#[derive(Default)]
struct InFlight {
    per_route: Mutex<HashMap<RouteKey, usize>>,
    current: AtomicUsize,
    max_total: AtomicUsize,
    route_overlaps: AtomicUsize,
    calls: AtomicUsize,
}

struct SlowSource {
    tracker: Arc<InFlight>,
}

#[async_trait]
impl FlightSource for SlowSource {
    fn name(&self) -> &str {
        "slow"
    }

    async fn fetch(
        &self,
        route: &RouteKey,
        window: DateRange,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<FlightOffer>, SourceError> {
        let t = &self.tracker;
        t.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut per_route = t.per_route.lock().unwrap();
            let n = per_route.entry(route.clone()).or_insert(0);
            *n += 1;
            if *n > 1 {
                t.route_overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }
        let now = t.current.fetch_add(1, Ordering::SeqCst) + 1;
        t.max_total.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(15)).await;

        t.current.fetch_sub(1, Ordering::SeqCst);
        *t.per_route.lock().unwrap().get_mut(route).unwrap() -= 1;

        Ok(window
            .dates()
            .map(|date| offer(route, date, "Jetstar", dec!(150), observed_at))
            .collect())
    }
}

/// Never answers within any reasonable deadline
struct StalledProvider;

#[async_trait]
impl InsightProvider for StalledProvider {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn complete(&self, _summary: &MarketSummary) -> Result<ProviderInsights, ProviderError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ProviderInsights::default())
    }
}

fn pipeline(
    sources: Vec<Arc<dyn FlightSource>>,
    provider: Option<Arc<dyn InsightProvider>>,
    max_routes: usize,
) -> (Arc<OfferStore>, Arc<Collector>, Arc<Aggregator>, QueryService) {
    let store = Arc::new(OfferStore::new());
    let collector = Arc::new(Collector::new(store.clone(), sources, max_routes));
    let aggregator = Arc::new(Aggregator::new(store.clone(), AggregatorSettings::default()));
    let settings = InsightSettings {
        timeout: Duration::from_secs(60),
        backoff: Duration::from_millis(1),
        ..Default::default()
    };
    let insights = Arc::new(InsightGenerator::new(provider, settings));
    let query = QueryService::new(
        store.clone(),
        aggregator.clone(),
        insights,
        QuerySettings::default(),
    );
    (store, collector, aggregator, query)
}

#[tokio::test]
async fn syd_mel_three_day_scenario() {
    let source = FixtureSource {
        prices: HashMap::from([(day(1), dec!(100)), (day(2), dec!(120)), (day(3), dec!(110))]),
    };
    let (store, collector, aggregator, query) = pipeline(vec![Arc::new(source)], None, 2);
    let syd_mel = route("SYD-MEL");

    let report = collector.collect(&[syd_mel.clone()], jan(1, 3)).await.unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(store.len(), 3);

    let summary = aggregator.summarize(&syd_mel, Utc::now());
    assert_eq!(summary.average_price, dec!(110));
    let trend: Vec<(NaiveDate, Decimal)> =
        summary.price_trend.iter().map(|p| (p.date, p.price)).collect();
    assert_eq!(
        trend,
        vec![(day(1), dec!(100)), (day(2), dec!(120)), (day(3), dec!(110))]
    );

    let mut filters = ViewFilters::default();
    filters.origin = Some("SYD".to_string());
    filters.destination = Some("MEL".to_string());
    let view = query.get_filtered_view(&filters, None).await;
    assert_eq!(view.offers.len(), 3);
    assert_eq!(view.summaries.len(), 1);
    assert_eq!(view.insights.len(), 1);
    assert_eq!(view.insights[0].source, InsightSource::Fallback);
    assert_eq!(view.insights[0].summary_hash, view.summaries[0].snapshot_hash());
    assert!(!view.insights[0].demand_insights.is_empty());
}

#[tokio::test]
async fn recollecting_same_observation_is_idempotent() {
    let store = OfferStore::new();
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let batch: Vec<FlightOffer> = (1..=3)
        .map(|d| offer(&route("SYD-MEL"), day(d), "Qantas", dec!(99), at))
        .collect();
    store.put(batch.clone());
    let first: Vec<FlightOffer> = store.query(None, None).collect();
    let stats = store.put(batch);
    assert_eq!(stats.inserted, 0);
    assert_eq!(first, store.query(None, None).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_collection_serializes_each_route() {
    let tracker = Arc::new(InFlight::default());
    let source = SlowSource {
        tracker: tracker.clone(),
    };
    let max_parallel = 3;
    let (store, collector, _aggregator, _query) =
        pipeline(vec![Arc::new(source)], None, max_parallel);

    let all = ["SYD-MEL", "MEL-SYD", "SYD-BNE", "BNE-SYD", "MEL-BNE"];
    let mut handles = Vec::new();
    for i in 0..12 {
        let collector = collector.clone();
        // Overlapping route sets, including repeats of the same route
        let routes: Vec<RouteKey> = (0..3).map(|k| route(all[(i + k) % all.len()])).collect();
        handles.push(tokio::spawn(async move {
            collector.collect(&routes, jan(1, 2)).await
        }));
    }
    let reader_store = store.clone();
    let reader = tokio::spawn(async move {
        let mut last = 0usize;
        for _ in 0..50 {
            let seen = reader_store.query(None, None).count();
            assert!(seen >= last, "store shrank during collection");
            last = seen;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    let joined = tokio::time::timeout(Duration::from_secs(20), async {
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        reader.await.unwrap();
    })
    .await;
    assert!(joined.is_ok(), "collection deadlocked");

    assert_eq!(tracker.calls.load(Ordering::SeqCst), 36);
    assert_eq!(tracker.route_overlaps.load(Ordering::SeqCst), 0);
    assert!(tracker.max_total.load(Ordering::SeqCst) <= max_parallel);
    assert_eq!(store.routes().len(), all.len());
    // Every stored offer has a unique identity
    let keys: std::collections::HashSet<_> = store.query(None, None).map(|o| o.key()).collect();
    assert_eq!(keys.len(), store.len());
}

#[tokio::test]
async fn deadline_returns_partial_view() {
    let source = FixtureSource {
        prices: HashMap::from([(day(1), dec!(100))]),
    };
    let (_store, collector, _aggregator, query) = pipeline(
        vec![Arc::new(source)],
        Some(Arc::new(StalledProvider)),
        2,
    );
    collector
        .collect(&[route("SYD-MEL"), route("MEL-SYD")], jan(1, 1))
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let view = query
        .get_filtered_view(&ViewFilters::default(), Some(Duration::from_millis(100)))
        .await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(view.partial);
    assert_eq!(view.summaries.len(), 2);
    assert!(view.insights.is_empty());
    assert_eq!(view.omitted.len(), 2);
    assert_eq!(view.offers.len(), 2);
}

#[tokio::test]
async fn summaries_ignore_offers_observed_later() {
    let store = Arc::new(OfferStore::new());
    let aggregator = Aggregator::new(store.clone(), AggregatorSettings::default());
    let syd_mel = route("SYD-MEL");
    let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let late = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    store.put(vec![
        offer(&syd_mel, day(5), "Qantas", dec!(100), early),
        offer(&syd_mel, day(5), "Jetstar", dec!(300), late),
    ]);
    let before = aggregator.summarize(&syd_mel, early);
    let after = aggregator.summarize(&syd_mel, late);
    assert_eq!(before.average_price, dec!(100));
    assert_eq!(after.average_price, dec!(200));
    assert_ne!(before.snapshot_hash(), after.snapshot_hash());
}
