//! Offline flight-data generator
//!
//! Produces plausible quotes without network access. Each (route, travel date)
//! pair seeds its own RNG, so the same request always yields the same quotes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::FlightSource;
use crate::collector::normalize::{Normalizer, ProviderOffer};
use crate::error::SourceError;
use crate::types::{Currency, DateRange, FlightOffer, RouteKey};

const DOMESTIC_AIRPORTS: &[&str] = &[
    "SYD", "MEL", "BNE", "PER", "ADL", "OOL", "CNS", "DRW", "HBA", "CBR",
];

const DOMESTIC_AIRLINES: &[&str] = &["Qantas", "Virgin Australia", "Jetstar", "Tiger Air"];

const INTERNATIONAL_AIRLINES: &[&str] = &[
    "Qantas",
    "Virgin Australia",
    "Singapore Airlines",
    "Cathay Pacific",
    "Emirates",
    "Thai Airways",
    "ANA",
    "Korean Air",
];

const ASIA_AIRPORTS: &[&str] = &["SIN", "BKK", "NRT", "ICN", "HKG"];
const LONG_HAUL_AIRPORTS: &[&str] = &["LAX", "LHR"];

/// Known domestic distances in km, either direction
const DISTANCES: &[(&str, &str, u32)] = &[
    ("SYD", "MEL", 880),
    ("SYD", "BNE", 920),
    ("MEL", "BNE", 1370),
    ("SYD", "PER", 3290),
    ("MEL", "PER", 2840),
    ("SYD", "ADL", 1160),
];

const CABINS: &[&str] = &["Economy", "Economy", "Economy", "Premium Economy", "Business", "First"];

/// Deterministic simulated provider
pub struct SimulatedSource {
    normalizer: Normalizer,
    max_per_day: usize,
}

impl SimulatedSource {
    pub fn new(currency: Currency) -> Self {
        Self {
            normalizer: Normalizer::new("simulated", currency),
            max_per_day: 4,
        }
    }

    /// Raw records for one travel date
    fn quotes_for(&self, route: &RouteKey, date: NaiveDate) -> Vec<ProviderOffer> {
        let distance = estimate_distance(route);
        let base_price = (distance as f64 * 0.15).max(200.0);
        let pool = if is_domestic(route) {
            DOMESTIC_AIRLINES
        } else {
            INTERNATIONAL_AIRLINES
        };

        let mut rng = StdRng::seed_from_u64(seed(&[&route.to_string(), &date.to_string()]));
        let count = rng.gen_range(1..=self.max_per_day.min(pool.len()));
        // Distinct airlines per date keep offer identities unique
        let airlines: Vec<&str> = pool.choose_multiple(&mut rng, count).copied().collect();

        airlines
            .into_iter()
            .map(|airline| {
                let price = base_price * rng.gen_range(0.8..1.4);
                ProviderOffer {
                    origin: Some(route.origin.clone()),
                    destination: Some(route.destination.clone()),
                    travel_date: date.to_string(),
                    airline: airline.to_string(),
                    price: Decimal::from_f64(price).unwrap_or_default(),
                    currency: None,
                    demand: Some(rng.gen_range(0.3..1.0)),
                    seats_available: Some(rng.gen_range(5..=200)),
                    stops: Some(if rng.gen_bool(0.75) { 0 } else { 1 }),
                    cabin: CABINS.choose(&mut rng).map(|c| c.to_string()),
                    observed_at: None,
                }
            })
            .collect()
    }
}

#[async_trait]
impl FlightSource for SimulatedSource {
    fn name(&self) -> &str {
        self.normalizer.source()
    }

    async fn fetch(
        &self,
        route: &RouteKey,
        window: DateRange,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<FlightOffer>, SourceError> {
        let offers = window
            .dates()
            .flat_map(|date| self.quotes_for(route, date))
            .map(|raw| self.normalizer.normalize(raw, route, observed_at))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(route = %route, window = %window, offers = offers.len(), "Generated simulated offers");
        Ok(offers)
    }
}

fn seed(parts: &[&str]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn is_domestic(route: &RouteKey) -> bool {
    DOMESTIC_AIRPORTS.contains(&route.origin.as_str())
        && DOMESTIC_AIRPORTS.contains(&route.destination.as_str())
}

/// Route distance in km. Unknown routes get a stable pseudo-random distance
/// in the band for their region.
fn estimate_distance(route: &RouteKey) -> u32 {
    let (o, d) = (route.origin.as_str(), route.destination.as_str());
    if let Some((_, _, km)) = DISTANCES
        .iter()
        .find(|(a, b, _)| (*a == o && *b == d) || (*a == d && *b == o))
    {
        return *km;
    }
    let mut rng = StdRng::seed_from_u64(seed(&[o, d, "distance"]));
    if ASIA_AIRPORTS.contains(&d) || ASIA_AIRPORTS.contains(&o) {
        rng.gen_range(6000..=9000)
    } else if LONG_HAUL_AIRPORTS.contains(&d) || LONG_HAUL_AIRPORTS.contains(&o) {
        rng.gen_range(15000..=20000)
    } else {
        rng.gen_range(1000..=5000)
    }
}
