//! Cross-route market statistics: price distribution, route coverage,
//! data quality and demand by destination

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::trend::mean;
use crate::types::{Currency, FlightOffer, RouteKey};

/// Fields of an offer counted for completeness
const OFFER_FIELDS: usize = 10;
/// Most points a null count can take off the quality score
const MAX_NULL_PENALTY: usize = 20;

/// Spread of fares in the summary currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceDistribution {
    pub mean: Decimal,
    pub median: Decimal,
    /// Sample standard deviation; zero for a single fare
    pub std_dev: Decimal,
    pub p25: Decimal,
    pub p75: Decimal,
    pub p90: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteAnalysis {
    pub total_routes: usize,
    /// Route with the most offers, lowest route first on ties
    pub most_frequent: Option<RouteKey>,
    pub most_frequent_offers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQuality {
    /// 0..=100
    pub quality_score: u32,
    pub issues: Vec<String>,
    /// Percentage of offer fields that carry a value
    pub completeness: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatistics {
    pub offer_count: usize,
    pub price_distribution: Option<PriceDistribution>,
    pub route_analysis: RouteAnalysis,
    /// Days between the first and last travel date
    pub data_span_days: i64,
    pub data_quality: DataQuality,
}

/// Mean demand for one destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationDemand {
    pub destination: String,
    pub average_demand: Decimal,
    pub offers: usize,
}

/// Linear-interpolated quantile of sorted values
fn quantile(sorted: &[Decimal], q: Decimal) -> Decimal {
    match sorted.len() {
        0 => Decimal::ZERO,
        1 => sorted[0],
        n => {
            let pos = q * Decimal::from((n - 1) as u64);
            let lo = pos.floor();
            let idx = lo.to_usize().unwrap_or(0).min(n - 1);
            let next = sorted[(idx + 1).min(n - 1)];
            (sorted[idx] + (next - sorted[idx]) * (pos - lo)).round_dp(2)
        }
    }
}

pub fn price_distribution(prices: &mut [Decimal]) -> Option<PriceDistribution> {
    if prices.is_empty() {
        return None;
    }
    prices.sort();
    let n = prices.len();
    let sum: Decimal = prices.iter().copied().sum();
    let exact_mean = sum / Decimal::from(n as u64);
    let std_dev = if n < 2 {
        Decimal::ZERO
    } else {
        let squares: Decimal = prices
            .iter()
            .map(|p| (*p - exact_mean) * (*p - exact_mean))
            .sum();
        (squares / Decimal::from((n - 1) as u64))
            .sqrt()
            .unwrap_or_default()
            .round_dp(2)
    };
    Some(PriceDistribution {
        mean: mean(sum, n),
        median: quantile(prices, dec!(0.5)),
        std_dev,
        p25: quantile(prices, dec!(0.25)),
        p75: quantile(prices, dec!(0.75)),
        p90: quantile(prices, dec!(0.9)),
    })
}

fn assess_quality(offers: &[&FlightOffer], excluded: usize) -> DataQuality {
    if offers.is_empty() {
        return DataQuality {
            quality_score: 0,
            issues: vec!["No data available".to_string()],
            completeness: Decimal::ZERO,
        };
    }

    let missing = [
        ("stops", offers.iter().filter(|o| o.stops.is_none()).count()),
        ("cabin", offers.iter().filter(|o| o.cabin.is_none()).count()),
        (
            "seats_available",
            offers.iter().filter(|o| o.seats_available.is_none()).count(),
        ),
    ];
    let nulls: usize = missing.iter().map(|(_, n)| n).sum();

    let mut issues = Vec::new();
    if nulls > 0 {
        let fields: Vec<String> = missing
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(field, n)| format!("{field}={n}"))
            .collect();
        issues.push(format!("Missing values in: {}", fields.join(", ")));
    }
    if excluded > 0 {
        issues.push(format!("{excluded} offers priced in other currencies"));
    }
    if issues.is_empty() {
        issues.push("No major issues detected".to_string());
    }

    let cells = Decimal::from((offers.len() * OFFER_FIELDS) as u64);
    let completeness =
        ((Decimal::ONE - Decimal::from(nulls as u64) / cells) * Decimal::ONE_HUNDRED).round_dp(2);
    DataQuality {
        quality_score: (100 - nulls.min(MAX_NULL_PENALTY)) as u32,
        issues,
        completeness,
    }
}

/// Statistics over every offer yielded by `offers`. Fares in other
/// currencies are left out of the price distribution.
pub fn compute_statistics<'a, I>(offers: I, currency: Currency) -> MarketStatistics
where
    I: IntoIterator<Item = &'a FlightOffer>,
{
    let offers: Vec<&FlightOffer> = offers.into_iter().collect();
    let mut prices: Vec<Decimal> = offers
        .iter()
        .filter(|o| o.price.currency == currency)
        .map(|o| o.price.amount)
        .collect();
    let excluded = offers.len() - prices.len();

    let mut per_route: BTreeMap<&RouteKey, usize> = BTreeMap::new();
    let mut span: Option<(NaiveDate, NaiveDate)> = None;
    for offer in &offers {
        *per_route.entry(&offer.route).or_default() += 1;
        let d = offer.travel_date;
        span = Some(span.map_or((d, d), |(lo, hi)| (lo.min(d), hi.max(d))));
    }
    let mut most_frequent: Option<(&RouteKey, usize)> = None;
    for (route, count) in &per_route {
        if most_frequent.map_or(true, |(_, best)| *count > best) {
            most_frequent = Some((*route, *count));
        }
    }

    MarketStatistics {
        offer_count: offers.len(),
        price_distribution: price_distribution(&mut prices),
        route_analysis: RouteAnalysis {
            total_routes: per_route.len(),
            most_frequent: most_frequent.map(|(r, _)| r.clone()),
            most_frequent_offers: most_frequent.map_or(0, |(_, n)| n),
        },
        data_span_days: span.map_or(0, |(lo, hi)| (hi - lo).num_days()),
        data_quality: assess_quality(&offers, excluded),
    }
}

/// Mean demand per destination, highest first, ties by destination
pub fn demand_by_destination<'a, I>(offers: I, limit: usize) -> Vec<DestinationDemand>
where
    I: IntoIterator<Item = &'a FlightOffer>,
{
    let mut totals: BTreeMap<&str, (u64, usize)> = BTreeMap::new();
    for offer in offers {
        let entry = totals.entry(offer.route.destination.as_str()).or_default();
        entry.0 += offer.demand_score as u64;
        entry.1 += 1;
    }
    let mut ranked: Vec<DestinationDemand> = totals
        .into_iter()
        .map(|(destination, (sum, count))| DestinationDemand {
            destination: destination.to_string(),
            average_demand: (Decimal::from(sum) / Decimal::from(count as u64)).round_dp(1),
            offers: count,
        })
        .collect();
    ranked.sort_by(|a, b| b.average_demand.cmp(&a.average_demand));
    ranked.truncate(limit);
    ranked
}
