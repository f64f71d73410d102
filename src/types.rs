//! Core types used throughout AirDemand
//!
//! Defines routes, prices, offers and date windows shared by every stage.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppError;

/// Supported pricing currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Currency {
    AUD,
    NZD,
    USD,
    EUR,
    GBP,
    SGD,
    JPY,
}

impl Default for Currency {
    fn default() -> Self {
        Currency::AUD
    }
}

impl Currency {
    /// Parse from an ISO code, case-insensitive
    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "AUD" => Some(Currency::AUD),
            "NZD" => Some(Currency::NZD),
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            "GBP" => Some(Currency::GBP),
            "SGD" => Some(Currency::SGD),
            "JPY" => Some(Currency::JPY),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Currency::AUD => "AUD",
            Currency::NZD => "NZD",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::SGD => "SGD",
            Currency::JPY => "JPY",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Currency-tagged decimal amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Price {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.2}", self.currency, self.amount)
    }
}

/// Normalise an airport code: three ASCII letters, upper case
pub fn airport_code(raw: &str) -> Option<String> {
    let code = raw.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code.to_ascii_uppercase())
    } else {
        None
    }
}

/// Ordered origin/destination pair identifying a market.
///
/// `SYD-MEL` and `MEL-SYD` are different routes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub origin: String,
    pub destination: String,
}

impl RouteKey {
    /// Build from two airport codes. Returns `None` for malformed codes or
    /// when origin and destination are the same airport.
    pub fn new(origin: &str, destination: &str) -> Option<Self> {
        let origin = airport_code(origin)?;
        let destination = airport_code(destination)?;
        if origin == destination {
            return None;
        }
        Some(Self {
            origin,
            destination,
        })
    }

    /// Parse the text form, e.g. "SYD-MEL" (also accepts "SYD>MEL" and "SYD/MEL")
    pub fn parse(s: &str) -> Option<Self> {
        let (origin, destination) = s.split_once(|c: char| c == '-' || c == '>' || c == '/')?;
        Self::new(origin, destination)
    }

    /// The same market flown the other way
    pub fn reversed(&self) -> Self {
        Self {
            origin: self.destination.clone(),
            destination: self.origin.clone(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.origin, self.destination)
    }
}

/// Inclusive range of calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, AppError> {
        if from > to {
            return Err(AppError::InvalidFilter(format!(
                "date range starts after it ends ({} > {})",
                from, to
            )));
        }
        Ok(Self { from, to })
    }

    /// Window of `days` dates starting `offset_days` after `start`
    pub fn rolling(start: NaiveDate, offset_days: i64, days: i64) -> Self {
        let from = start + Duration::days(offset_days);
        let to = from + Duration::days(days.max(1) - 1);
        Self { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    /// Number of dates in the range
    pub fn len_days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let from = self.from;
        (0..self.len_days()).map(move |i| from + Duration::days(i))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.from, self.to)
    }
}

/// A single observed price quote for a route on a given travel date.
///
/// Immutable once stored; identity is `(route, travel_date, airline, observed_at)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightOffer {
    #[serde(flatten)]
    pub route: RouteKey,
    pub observed_at: DateTime<Utc>,
    pub travel_date: NaiveDate,
    pub airline: String,
    pub price: Price,
    /// 0..=100
    pub demand_score: u32,
    #[serde(default)]
    pub stops: Option<u8>,
    #[serde(default)]
    pub cabin: Option<String>,
    #[serde(default)]
    pub seats_available: Option<u32>,
    /// Name of the source that produced this offer
    #[serde(default)]
    pub source: String,
}

/// Identity of a stored offer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OfferKey {
    pub route: RouteKey,
    pub travel_date: NaiveDate,
    pub airline: String,
    pub observed_at: DateTime<Utc>,
}

impl FlightOffer {
    pub fn key(&self) -> OfferKey {
        OfferKey {
            route: self.route.clone(),
            travel_date: self.travel_date,
            airline: self.airline.clone(),
            observed_at: self.observed_at,
        }
    }

    /// Ordering key within a single route partition
    pub fn partition_key(&self) -> (NaiveDate, &str, DateTime<Utc>) {
        (self.travel_date, self.airline.as_str(), self.observed_at)
    }
}
