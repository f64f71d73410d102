//! AirDemand server
//!
//! Wires the collector, store, aggregator, insight generator and query
//! service together, restores the last snapshot, and serves the HTTP API
//! until Ctrl-C.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use airdemand::aggregator::{Aggregator, AggregatorSettings};
use airdemand::collector::{Collector, PeriodicSettings};
use airdemand::config::{AppConfig, LogConfig};
use airdemand::dashboard::{create_router, AppState};
use airdemand::insights::InsightGenerator;
use airdemand::persistence::SnapshotPersistence;
use airdemand::query::{QuerySettings, QueryService};
use airdemand::store::OfferStore;

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    if log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Save store and market state on a blocking thread
async fn save_snapshot(
    persistence: SnapshotPersistence,
    store: Arc<OfferStore>,
    aggregator: Arc<Aggregator>,
    insights: Arc<InsightGenerator>,
) {
    let result = tokio::task::spawn_blocking(move || {
        let summaries = aggregator.summarize_all(Utc::now());
        persistence.save_all(&store, summaries, &insights)
    })
    .await;
    match result {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(error = %e, "Snapshot save failed"),
        Err(e) => warn!(error = %e, "Snapshot task panicked"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.log);
    info!(config = %config, "Starting AirDemand");

    let routes = config.collector.route_keys()?;
    let currency = config.aggregator.currency()?;

    let store = Arc::new(OfferStore::new());
    let insights = Arc::new(InsightGenerator::from_config(&config.insights));
    let aggregator = Arc::new(Aggregator::new(
        store.clone(),
        AggregatorSettings::from_config(&config.aggregator)?,
    ));
    let collector = Arc::new(Collector::from_config(
        store.clone(),
        &config.collector,
        currency,
    ));
    let query = Arc::new(QueryService::new(
        store.clone(),
        aggregator.clone(),
        insights.clone(),
        QuerySettings::from_config(&config.query),
    ));

    // Restore the last snapshot before anything reads the store
    let persistence = if config.persistence.enabled {
        Some(SnapshotPersistence::new(&config.persistence.data_dir)?)
    } else {
        None
    };
    let recovery_warnings = match &persistence {
        Some(p) => p.recover(&store, &insights).warnings,
        None => Vec::new(),
    };

    let schedule = PeriodicSettings::from_config(&config.collector, config.store.retention_days);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(collector.clone().run_periodic(
        routes.clone(),
        schedule,
        shutdown_rx.clone(),
    )));

    if let Some(persistence) = persistence.clone() {
        let interval = Duration::from_secs(config.persistence.snapshot_interval_secs.max(1));
        let (store, aggregator, insights) = (store.clone(), aggregator.clone(), insights.clone());
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        insights.purge_expired();
                        save_snapshot(
                            persistence.clone(),
                            store.clone(),
                            aggregator.clone(),
                            insights.clone(),
                        )
                        .await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));
    }

    let state = Arc::new(AppState {
        store: store.clone(),
        collector,
        query,
        routes,
        schedule,
        insight_provider: insights.has_provider(),
        recovery_warnings: RwLock::new(recovery_warnings),
        started_at: Utc::now(),
    });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "HTTP API listening");

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping...");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        let _ = task.await;
    }
    match server.await {
        Ok(Err(e)) => warn!(error = %e, "HTTP server error"),
        Err(e) => warn!(error = %e, "HTTP server task failed"),
        Ok(Ok(())) => {}
    }

    if let Some(persistence) = persistence {
        save_snapshot(persistence, store, aggregator, insights).await;
    }
    info!("AirDemand stopped");
    Ok(())
}
