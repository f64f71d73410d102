//! Trend Builder - Buckets offer prices by travel date
//!
//! Buckets are aligned to a fixed day count since the common era, so the
//! same date always lands in the same bucket whatever else is in the set.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean price for one trend bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// First date of the bucket
    pub date: NaiveDate,
    pub price: Decimal,
    pub offers: usize,
}

#[derive(Debug, Clone, Default)]
struct Bucket {
    sum: Decimal,
    count: usize,
}

/// Accumulates prices into time buckets and emits their means in date order
#[derive(Debug, Clone)]
pub struct TrendBuilder {
    bucket_days: u32,
    buckets: BTreeMap<NaiveDate, Bucket>,
}

impl TrendBuilder {
    pub fn new(bucket_days: u32) -> Self {
        Self {
            bucket_days: bucket_days.max(1),
            buckets: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, date: NaiveDate, price: Decimal) {
        let bucket = self
            .buckets
            .entry(bucket_start(date, self.bucket_days))
            .or_default();
        bucket.sum += price;
        bucket.count += 1;
    }

    pub fn finish(self) -> Vec<TrendPoint> {
        self.buckets
            .into_iter()
            .map(|(date, bucket)| TrendPoint {
                date,
                price: mean(bucket.sum, bucket.count),
                offers: bucket.count,
            })
            .collect()
    }
}

/// Get bucket start date for a date and bucket width
pub fn bucket_start(date: NaiveDate, bucket_days: u32) -> NaiveDate {
    if bucket_days <= 1 {
        return date;
    }
    let days = date.num_days_from_ce();
    let start = days - days.rem_euclid(bucket_days as i32);
    NaiveDate::from_num_days_from_ce_opt(start).unwrap_or(date)
}

/// Mean rounded to cents; zero for an empty set
pub fn mean(sum: Decimal, count: usize) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    (sum / Decimal::from(count as u64)).round_dp(2)
}

/// Percentage change from the first to the last trend point
pub fn change_pct(points: &[TrendPoint]) -> Option<Decimal> {
    let first = points.first()?;
    let last = points.last()?;
    if points.len() < 2 || first.price.is_zero() {
        return None;
    }
    Some(((last.price - first.price) / first.price * Decimal::ONE_HUNDRED).round_dp(1))
}
