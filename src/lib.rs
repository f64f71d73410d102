//! AirDemand Library
//!
//! Airline market demand analytics: collects flight offers, summarises each
//! market and annotates summaries with generated insights.

pub mod aggregator;
pub mod collector;
pub mod config;
pub mod error;
pub mod insights;
pub mod persistence;
pub mod query;
pub mod store;
pub mod types;

#[cfg(feature = "dashboard")]
pub mod dashboard;
