//! Provider record normalisation
//!
//! Turns loosely-typed provider records into `FlightOffer`s. Every source goes
//! through the same rules so offers from different providers compare cleanly.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::types::{airport_code, Currency, FlightOffer, Price, RouteKey};

/// Demand assumed when a provider gives neither a score nor seat counts
pub const DEFAULT_DEMAND: u32 = 50;

/// Seat count treated as an empty aircraft when deriving demand
const FULL_AVAILABILITY_SEATS: u32 = 200;

/// Offer record as returned by a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOffer {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    /// ISO date, e.g. "2024-01-01"
    #[serde(alias = "date", alias = "departureDate")]
    pub travel_date: String,
    pub airline: String,
    pub price: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    /// Either 0..1 or 0..100
    #[serde(default, alias = "demandScore")]
    pub demand: Option<f64>,
    #[serde(default)]
    pub seats_available: Option<u32>,
    #[serde(default)]
    pub stops: Option<u8>,
    #[serde(default, alias = "bookingClass")]
    pub cabin: Option<String>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

/// Applies normalisation rules on behalf of one source
#[derive(Debug, Clone)]
pub struct Normalizer {
    source: String,
    currency: Currency,
}

impl Normalizer {
    pub fn new(source: impl Into<String>, currency: Currency) -> Self {
        Self {
            source: source.into(),
            currency,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Normalise one record fetched for `route`. `observed_at` is used when the
    /// provider does not timestamp its quotes.
    pub fn normalize(
        &self,
        raw: ProviderOffer,
        route: &RouteKey,
        observed_at: DateTime<Utc>,
    ) -> Result<FlightOffer, SourceError> {
        check_code(raw.origin.as_deref(), &route.origin, "origin")?;
        check_code(raw.destination.as_deref(), &route.destination, "destination")?;

        let travel_date = NaiveDate::parse_from_str(raw.travel_date.trim(), "%Y-%m-%d")
            .map_err(|e| {
                SourceError::Normalize(format!("bad travel date {:?}: {e}", raw.travel_date))
            })?;

        let airline = raw.airline.trim();
        if airline.is_empty() {
            return Err(SourceError::Normalize("missing airline".to_string()));
        }

        let amount = raw.price.round_dp(2);
        if amount <= Decimal::ZERO {
            return Err(SourceError::Normalize(format!(
                "non-positive price {}",
                raw.price
            )));
        }

        let currency = match raw.currency.as_deref() {
            None => self.currency,
            Some(code) => Currency::from_code(code).ok_or_else(|| {
                SourceError::Normalize(format!("unsupported currency {code}"))
            })?,
        };

        let demand_score = match raw.demand {
            Some(demand) => scale_demand(demand)?,
            None => raw
                .seats_available
                .map(demand_from_seats)
                .unwrap_or(DEFAULT_DEMAND),
        };

        Ok(FlightOffer {
            route: route.clone(),
            observed_at: raw.observed_at.unwrap_or(observed_at),
            travel_date,
            airline: airline.to_string(),
            price: Price::new(amount, currency),
            demand_score,
            stops: raw.stops,
            cabin: raw
                .cabin
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            seats_available: raw.seats_available,
            source: self.source.clone(),
        })
    }
}

fn check_code(raw: Option<&str>, expected: &str, field: &str) -> Result<(), SourceError> {
    let Some(raw) = raw else {
        return Ok(());
    };
    match airport_code(raw) {
        Some(code) if code == expected => Ok(()),
        Some(code) => Err(SourceError::Normalize(format!(
            "{field} {code} does not match requested {expected}"
        ))),
        None => Err(SourceError::Normalize(format!("bad {field} code {raw:?}"))),
    }
}

/// Map a provider demand value onto 0..=100
fn scale_demand(demand: f64) -> Result<u32, SourceError> {
    if !demand.is_finite() || demand < 0.0 {
        return Err(SourceError::Normalize(format!("bad demand value {demand}")));
    }
    let scaled = if demand <= 1.0 { demand * 100.0 } else { demand };
    Ok(scaled.round().min(100.0) as u32)
}

/// Fewer seats left means higher demand
fn demand_from_seats(seats: u32) -> u32 {
    let seats = seats.min(FULL_AVAILABILITY_SEATS);
    100 - seats * 100 / FULL_AVAILABILITY_SEATS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn raw(price: Decimal) -> ProviderOffer {
        ProviderOffer {
            origin: Some("syd".to_string()),
            destination: Some("mel".to_string()),
            travel_date: "2024-01-02".to_string(),
            airline: " Qantas ".to_string(),
            price,
            currency: None,
            demand: None,
            seats_available: None,
            stops: Some(0),
            cabin: Some("Economy".to_string()),
            observed_at: None,
        }
    }

    fn normalizer() -> Normalizer {
        Normalizer::new("test", Currency::AUD)
    }

    fn route() -> RouteKey {
        RouteKey::new("SYD", "MEL").unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn normalises_codes_price_and_defaults() {
        let offer = normalizer()
            .normalize(raw(dec!(123.456)), &route(), now())
            .unwrap();
        assert_eq!(offer.airline, "Qantas");
        assert_eq!(offer.price.amount, dec!(123.46));
        assert_eq!(offer.price.currency, Currency::AUD);
        assert_eq!(offer.demand_score, DEFAULT_DEMAND);
        assert_eq!(offer.observed_at, now());
        assert_eq!(offer.source, "test");
    }

    #[test]
    fn rejects_bad_records() {
        let n = normalizer();
        assert!(n.normalize(raw(dec!(0)), &route(), now()).is_err());
        assert!(n.normalize(raw(dec!(-5)), &route(), now()).is_err());

        let mut wrong_route = raw(dec!(100));
        wrong_route.destination = Some("BNE".to_string());
        assert!(n.normalize(wrong_route, &route(), now()).is_err());

        let mut bad_date = raw(dec!(100));
        bad_date.travel_date = "02/01/2024".to_string();
        assert!(n.normalize(bad_date, &route(), now()).is_err());

        let mut bad_currency = raw(dec!(100));
        bad_currency.currency = Some("XYZ".to_string());
        assert!(n.normalize(bad_currency, &route(), now()).is_err());
    }

    #[test]
    fn demand_scales_and_derives() {
        let n = normalizer();
        let mut fractional = raw(dec!(100));
        fractional.demand = Some(0.75);
        assert_eq!(n.normalize(fractional, &route(), now()).unwrap().demand_score, 75);

        let mut percent = raw(dec!(100));
        percent.demand = Some(82.0);
        assert_eq!(n.normalize(percent, &route(), now()).unwrap().demand_score, 82);

        let mut scarce = raw(dec!(100));
        scarce.seats_available = Some(10);
        assert_eq!(n.normalize(scarce, &route(), now()).unwrap().demand_score, 95);

        let mut nan = raw(dec!(100));
        nan.demand = Some(f64::NAN);
        assert!(n.normalize(nan, &route(), now()).is_err());
    }

    #[test]
    fn decodes_camel_case_payload() {
        let json = r#"{"origin":"SYD","destination":"MEL","travelDate":"2024-01-03",
            "airline":"Jetstar","price":89.5,"currency":"AUD","seatsAvailable":40}"#;
        let record: ProviderOffer = serde_json::from_str(json).unwrap();
        let offer = normalizer().normalize(record, &route(), now()).unwrap();
        assert_eq!(offer.price.amount, dec!(89.5));
        assert_eq!(offer.seats_available, Some(40));
        assert_eq!(offer.demand_score, 80);
    }
}
