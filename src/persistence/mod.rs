//! Snapshot Persistence Module
//!
//! Keeps the offer store and the latest market snapshot on disk so a restart
//! does not lose collected data:
//!
//! - `offers.csv`: one flat row per stored offer
//! - `market_snapshot.json`: latest summaries plus cached insight bundles
//!
//! Files are written to a temporary path and renamed into place. A file that
//! cannot be read back is moved aside to `*.corrupt` and startup continues
//! with an empty store.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::aggregator::MarketSummary;
use crate::error::AppError;
use crate::insights::{InsightBundle, InsightGenerator};
use crate::store::{OfferStore, StoreSnapshot};
use crate::types::{Currency, FlightOffer, Price, RouteKey};

const OFFERS_FILE: &str = "offers.csv";
const MARKET_FILE: &str = "market_snapshot.json";
const SNAPSHOT_VERSION: u32 = 1;

/// Offer row for CSV storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRecord {
    pub origin: String,
    pub destination: String,
    pub travel_date: NaiveDate,
    pub airline: String,
    pub observed_at: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub currency: String,
    pub demand_score: u32,
    #[serde(default)]
    pub stops: Option<u8>,
    #[serde(default)]
    pub cabin: Option<String>,
    #[serde(default)]
    pub seats_available: Option<u32>,
    #[serde(default)]
    pub source: String,
}

impl From<&FlightOffer> for OfferRecord {
    fn from(offer: &FlightOffer) -> Self {
        Self {
            origin: offer.route.origin.clone(),
            destination: offer.route.destination.clone(),
            travel_date: offer.travel_date,
            airline: offer.airline.clone(),
            observed_at: offer.observed_at,
            price: offer.price.amount,
            currency: offer.price.currency.code().to_string(),
            demand_score: offer.demand_score,
            stops: offer.stops,
            cabin: offer.cabin.clone(),
            seats_available: offer.seats_available,
            source: offer.source.clone(),
        }
    }
}

impl TryFrom<OfferRecord> for FlightOffer {
    type Error = String;

    fn try_from(record: OfferRecord) -> std::result::Result<Self, String> {
        let route = RouteKey::new(&record.origin, &record.destination)
            .ok_or_else(|| format!("bad route {}-{}", record.origin, record.destination))?;
        let currency = Currency::from_code(&record.currency)
            .ok_or_else(|| format!("bad currency {}", record.currency))?;
        if record.price <= Decimal::ZERO || record.demand_score > 100 {
            return Err(format!(
                "out-of-range values for {route} on {}",
                record.travel_date
            ));
        }
        Ok(FlightOffer {
            route,
            observed_at: record.observed_at,
            travel_date: record.travel_date,
            airline: record.airline,
            price: Price::new(record.price, currency),
            demand_score: record.demand_score,
            stops: record.stops,
            cabin: record.cabin,
            seats_available: record.seats_available,
            source: record.source,
        })
    }
}

/// Latest derived market state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub summaries: Vec<MarketSummary>,
    pub insights: Vec<InsightBundle>,
}

impl MarketSnapshot {
    pub fn new(summaries: Vec<MarketSummary>, insights: Vec<InsightBundle>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            summaries,
            insights,
        }
    }
}

/// What startup recovery found
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub offers_loaded: usize,
    pub bundles_seeded: usize,
    /// Corruption and quarantine messages, surfaced on the health endpoint
    pub warnings: Vec<String>,
}

/// Counts from one save cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    pub offers: usize,
    pub summaries: usize,
    pub bundles: usize,
}

/// File-backed snapshots under one data directory
#[derive(Debug, Clone)]
pub struct SnapshotPersistence {
    data_dir: PathBuf,
}

impl SnapshotPersistence {
    /// Create a new persistence manager, creating the directory if needed
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn offers_path(&self) -> PathBuf {
        self.data_dir.join(OFFERS_FILE)
    }

    pub fn market_path(&self) -> PathBuf {
        self.data_dir.join(MARKET_FILE)
    }

    /// Write every offer in `snapshot`, replacing the previous file
    pub fn save_offers(&self, snapshot: &StoreSnapshot) -> Result<usize> {
        let path = self.offers_path();
        let tmp = tmp_path(&path);
        let file = fs::File::create(&tmp).context("Failed to create offers temp file")?;
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);

        let mut written = 0usize;
        for offer in snapshot.iter(None) {
            writer
                .serialize(OfferRecord::from(offer))
                .context("Failed to write offer record")?;
            written += 1;
        }
        writer.flush().context("Failed to flush offers writer")?;
        drop(writer);

        fs::rename(&tmp, &path).context("Failed to move offers snapshot into place")?;
        Ok(written)
    }

    pub fn save_market(&self, snapshot: &MarketSnapshot) -> Result<()> {
        let path = self.market_path();
        let tmp = tmp_path(&path);
        let json = serde_json::to_vec_pretty(snapshot).context("Failed to encode market snapshot")?;
        fs::write(&tmp, json).context("Failed to write market snapshot temp file")?;
        fs::rename(&tmp, &path).context("Failed to move market snapshot into place")?;
        Ok(())
    }

    /// Save the store, current summaries and live insight bundles
    pub fn save_all(
        &self,
        store: &OfferStore,
        summaries: Vec<MarketSummary>,
        insights: &InsightGenerator,
    ) -> Result<SaveStats> {
        let offers = self.save_offers(&store.snapshot_all())?;
        let bundles = insights.cached_bundles();
        let stats = SaveStats {
            offers,
            summaries: summaries.len(),
            bundles: bundles.len(),
        };
        self.save_market(&MarketSnapshot::new(summaries, bundles))?;
        info!(
            offers = stats.offers,
            summaries = stats.summaries,
            bundles = stats.bundles,
            data_dir = %self.data_dir.display(),
            "Snapshot saved"
        );
        Ok(stats)
    }

    /// Read `offers.csv`. `Ok(None)` when the file does not exist.
    pub fn load_offers(&self) -> std::result::Result<Option<Vec<FlightOffer>>, AppError> {
        let path = self.offers_path();
        if !path.exists() {
            return Ok(None);
        }
        let corrupt = |reason: String| AppError::StoreCorruption {
            path: path.clone(),
            reason,
        };

        let file = fs::File::open(&path).map_err(|e| corrupt(e.to_string()))?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut offers = Vec::new();
        for (idx, result) in reader.deserialize::<OfferRecord>().enumerate() {
            let record = result.map_err(|e| corrupt(format!("row {}: {e}", idx + 1)))?;
            let offer =
                FlightOffer::try_from(record).map_err(|e| corrupt(format!("row {}: {e}", idx + 1)))?;
            offers.push(offer);
        }
        Ok(Some(offers))
    }

    /// Read `market_snapshot.json`. `Ok(None)` when the file does not exist.
    pub fn load_market(&self) -> std::result::Result<Option<MarketSnapshot>, AppError> {
        let path = self.market_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| AppError::StoreCorruption {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let snapshot: MarketSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| AppError::StoreCorruption {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AppError::StoreCorruption {
                path,
                reason: format!("unsupported snapshot version {}", snapshot.version),
            });
        }
        Ok(Some(snapshot))
    }

    /// Restore offers into `store` and seed `insights` from disk. Never
    /// fails: unreadable files are quarantined and reported.
    pub fn recover(&self, store: &OfferStore, insights: &InsightGenerator) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        match self.load_offers() {
            Ok(Some(offers)) => {
                report.offers_loaded = store.put(offers).inserted;
            }
            Ok(None) => {}
            Err(e) => self.quarantine(&self.offers_path(), e, &mut report),
        }

        match self.load_market() {
            Ok(Some(snapshot)) => {
                report.bundles_seeded = insights.seed(snapshot.insights);
            }
            Ok(None) => {}
            Err(e) => self.quarantine(&self.market_path(), e, &mut report),
        }

        info!(
            offers = report.offers_loaded,
            bundles = report.bundles_seeded,
            warnings = report.warnings.len(),
            "Recovery complete"
        );
        report
    }

    fn quarantine(&self, path: &Path, error: AppError, report: &mut RecoveryReport) {
        let aside = corrupt_path(path);
        let moved = fs::rename(path, &aside);
        warn!(
            error = %error,
            moved_to = %aside.display(),
            moved = moved.is_ok(),
            "Discarding unreadable snapshot"
        );
        report.warnings.push(match moved {
            Ok(()) => format!("{error}; moved to {}", aside.display()),
            Err(e) => format!("{error}; could not move aside: {e}"),
        });
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}
