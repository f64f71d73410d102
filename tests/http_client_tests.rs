//! Outbound HTTP clients against local mock servers
#![cfg(feature = "dashboard")]

use axum::{extract::Query, extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use airdemand::aggregator::{Aggregator, AggregatorSettings};
use airdemand::collector::{FlightSource, HttpFlightSource};
use airdemand::error::SourceError;
use airdemand::insights::{InsightGenerator, InsightSettings, InsightSource, OpenAiProvider};
use airdemand::store::OfferStore;
use airdemand::types::{Currency, DateRange, FlightOffer, Price, RouteKey};

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn settings() -> InsightSettings {
    InsightSettings {
        timeout: Duration::from_secs(2),
        backoff: Duration::from_millis(5),
        ..Default::default()
    }
}

fn non_empty_summary() -> airdemand::aggregator::MarketSummary {
    let store = Arc::new(OfferStore::new());
    let route = RouteKey::new("SYD", "MEL").unwrap();
    store.put(vec![FlightOffer {
        route: route.clone(),
        observed_at: Utc::now() - chrono::Duration::minutes(1),
        travel_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        airline: "Qantas".to_string(),
        price: Price::new(rust_decimal::Decimal::from(100), Currency::AUD),
        demand_score: 70,
        stops: None,
        cabin: None,
        seats_available: None,
        source: "test".to_string(),
    }]);
    Aggregator::new(store, AggregatorSettings::default()).summarize(&route, Utc::now())
}

#[tokio::test]
async fn failing_provider_falls_back_after_retries() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/chat/completions",
            post(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::INTERNAL_SERVER_ERROR, "upstream down")
            }),
        )
        .with_state(hits.clone());
    let base = spawn_server(router).await;

    let provider = OpenAiProvider::new(&base, "sk-test".to_string(), "gpt-3.5-turbo", Duration::from_secs(2));
    let generator = InsightGenerator::new(Some(Arc::new(provider)), settings());
    let bundle = generator.generate_insights(&non_empty_summary()).await;

    assert_eq!(bundle.source, InsightSource::Fallback);
    assert!(!bundle.demand_insights.is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn provider_json_reply_becomes_external_bundle() {
    let router = Router::new().route(
        "/chat/completions",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["model"], "gpt-3.5-turbo");
            let content = json!({
                "demand_insights": ["Strong weekend demand"],
                "price_insights": ["Fares stable"],
                "route_insights": [],
                "recommendations": ["Promote midweek stays"],
                "summary": "Healthy market"
            })
            .to_string();
            Json(json!({"choices": [{"message": {"role": "assistant", "content": content}}]}))
        }),
    );
    let base = spawn_server(router).await;

    let provider = OpenAiProvider::new(&base, "sk-test".to_string(), "gpt-3.5-turbo", Duration::from_secs(2));
    let generator = InsightGenerator::new(Some(Arc::new(provider)), settings());
    let summary = non_empty_summary();
    let bundle = generator.generate_insights(&summary).await;

    assert_eq!(bundle.source, InsightSource::External);
    assert_eq!(bundle.demand_insights, vec!["Strong weekend demand"]);
    assert_eq!(bundle.summary, "Healthy market");
    assert_eq!(bundle.summary_hash, summary.snapshot_hash());
}

#[tokio::test]
async fn http_source_normalises_provider_offers() {
    let router = Router::new().route(
        "/offers",
        get(|Query(q): Query<HashMap<String, String>>| async move {
            assert_eq!(q.get("origin").map(String::as_str), Some("SYD"));
            assert_eq!(q.get("dateFrom").map(String::as_str), Some("2024-01-01"));
            Json(json!({"data": [
                {"origin": "SYD", "destination": "MEL", "travelDate": "2024-01-01",
                 "airline": "Qantas", "price": 149.999, "demand": 0.8},
                {"origin": "SYD", "destination": "MEL", "travelDate": "2024-01-02",
                 "airline": "Jetstar", "price": -1}
            ]}))
        }),
    );
    let base = spawn_server(router).await;

    let source = HttpFlightSource::new(&base, None, Duration::from_secs(2), Currency::AUD);
    let window = DateRange::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
    )
    .unwrap();
    let offers = source
        .fetch(&RouteKey::new("SYD", "MEL").unwrap(), window, Utc::now())
        .await
        .unwrap();

    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].price.amount.to_string(), "150.00");
    assert_eq!(offers[0].demand_score, 80);
    assert_eq!(offers[0].source, "http");
}

#[tokio::test]
async fn http_source_reports_status_errors() {
    let router = Router::new().route("/offers", get(|| async { StatusCode::BAD_GATEWAY }));
    let base = spawn_server(router).await;

    let source = HttpFlightSource::new(&base, Some("key".to_string()), Duration::from_secs(2), Currency::AUD);
    let window = DateRange::rolling(Utc::now().date_naive(), 0, 1);
    let err = source
        .fetch(&RouteKey::new("SYD", "MEL").unwrap(), window, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Status(502)));
}
