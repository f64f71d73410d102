//! Rule-based insights computed from a summary's numbers alone
//!
//! Used whenever the external provider is disabled or exhausted. Output is a
//! pure function of the summary and always has at least one demand insight.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{InsightBundle, InsightSource};
use crate::aggregator::{change_pct, MarketSummary};

/// Price change (percent) treated as a real move rather than noise
const PRICE_MOVE_PCT: i64 = 5;
const STRONG_DEMAND: i64 = 75;
const SOFT_DEMAND: i64 = 50;

pub fn fallback_bundle(summary: &MarketSummary, generated_at: DateTime<Utc>) -> InsightBundle {
    let route = &summary.route;
    let mut bundle = InsightBundle {
        summary_hash: summary.snapshot_hash(),
        route: Some(route.clone()),
        demand_insights: Vec::new(),
        price_insights: Vec::new(),
        route_insights: Vec::new(),
        recommendations: Vec::new(),
        summary: String::new(),
        generated_at,
        source: InsightSource::Fallback,
    };

    if summary.is_empty() {
        bundle
            .demand_insights
            .push(format!("No flight data available for {route}"));
        bundle
            .recommendations
            .push(format!("Collect offers for {route} before drawing conclusions"));
        bundle.summary = format!("{route}: no observed offers");
        return bundle;
    }

    let demand_level = if summary.average_demand >= Decimal::from(STRONG_DEMAND) {
        "strong"
    } else if summary.average_demand >= Decimal::from(SOFT_DEMAND) {
        "moderate"
    } else {
        "soft"
    };
    bundle.demand_insights.push(format!(
        "Demand on {route} is {demand_level}: average score {} across {} offers",
        summary.average_demand, summary.offer_count
    ));
    bundle.demand_insights.push(format!(
        "Total observed demand for {route} is {}",
        summary.total_observed_demand
    ));

    let currency = summary.currency;
    bundle.price_insights.push(format!(
        "Average fare {currency} {:.2}, ranging from {:.2} to {:.2}",
        summary.average_price, summary.min_price, summary.max_price
    ));

    let change = change_pct(&summary.price_trend);
    match change {
        Some(pct) if pct >= Decimal::from(PRICE_MOVE_PCT) => bundle
            .price_insights
            .push(format!("Prices rose {pct}% over the window")),
        Some(pct) if pct <= Decimal::from(-PRICE_MOVE_PCT) => bundle
            .price_insights
            .push(format!("Prices fell {}% over the window", pct.abs())),
        Some(pct) => bundle
            .price_insights
            .push(format!("Prices held steady over the window ({pct}%)")),
        None => {}
    }
    if summary.excluded_offers > 0 {
        bundle.price_insights.push(format!(
            "{} offers priced in other currencies were left out of fare metrics",
            summary.excluded_offers
        ));
    }

    if let Some(leader) = summary.top_airlines.first() {
        bundle.route_insights.push(format!(
            "{} leads {route} with {} of {} offers",
            leader.airline, leader.offers, summary.offer_count
        ));
    }
    if summary.top_airlines.len() == 1 {
        bundle
            .route_insights
            .push(format!("{route} is served by a single airline in this window"));
    } else if summary.top_airlines.len() > 1 {
        bundle.route_insights.push(format!(
            "{} airlines compete on {route}",
            summary.top_airlines.len()
        ));
    }

    match (demand_level, change) {
        ("strong", Some(pct)) if pct > Decimal::ZERO => bundle
            .recommendations
            .push("Book early: high demand and fares are climbing".to_string()),
        ("soft", _) => bundle
            .recommendations
            .push("Watch for fare sales: demand is below average".to_string()),
        _ => bundle
            .recommendations
            .push("Monitor fares: market conditions are stable".to_string()),
    }
    bundle.summary = format!(
        "{route}: {demand_level} demand, average fare {currency} {:.2}",
        summary.average_price
    );
    bundle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{AirlineRank, TrendPoint};
    use crate::types::{Currency, RouteKey};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn summary() -> MarketSummary {
        let route = RouteKey::new("SYD", "MEL").unwrap();
        let mut s = MarketSummary::empty(route, Utc::now(), None, Currency::AUD);
        s.offer_count = 3;
        s.average_price = dec!(110);
        s.min_price = dec!(100);
        s.max_price = dec!(120);
        s.average_demand = dec!(80);
        s.total_observed_demand = 240;
        s.price_trend = vec![
            TrendPoint {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                price: dec!(100),
                offers: 1,
            },
            TrendPoint {
                date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                price: dec!(110),
                offers: 1,
            },
        ];
        s.top_airlines = vec![AirlineRank {
            airline: "Qantas".to_string(),
            offers: 3,
            average_price: dec!(110),
        }];
        s
    }

    #[test]
    fn describes_price_move_and_demand() {
        let bundle = fallback_bundle(&summary(), Utc::now());
        assert_eq!(bundle.source, InsightSource::Fallback);
        assert!(bundle.demand_insights[0].contains("strong"));
        assert!(bundle
            .price_insights
            .iter()
            .any(|p| p.starts_with("Prices rose 10")));
        assert!(bundle.route_insights[0].starts_with("Qantas leads"));
        assert!(bundle.recommendations[0].starts_with("Book early"));
    }

    #[test]
    fn empty_summary_still_has_content() {
        let route = RouteKey::new("SYD", "PER").unwrap();
        let empty = MarketSummary::empty(route, Utc::now(), None, Currency::AUD);
        let bundle = fallback_bundle(&empty, Utc::now());
        assert!(!bundle.is_empty());
        assert!(bundle.demand_insights[0].contains("No flight data"));
    }

    #[test]
    fn same_summary_same_text() {
        let at = Utc::now();
        let a = fallback_bundle(&summary(), at);
        let b = fallback_bundle(&summary(), at);
        assert_eq!(a, b);
    }
}
