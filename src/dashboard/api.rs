//! Dashboard HTTP API
//!
//! REST endpoints for market views, route summaries and collection.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use super::types::*;
use super::AppState;
use crate::error::AppError;
use crate::query::{ViewFilters, DESTINATION_DEMAND_LIMIT};
use crate::types::{DateRange, RouteKey};

const MAX_POPULAR_LIMIT: usize = 100;
const MAX_COLLECT_DAYS: i64 = 366;

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Views
        .route("/api/view", get(get_view))
        .route("/filter", get(get_view))
        .route("/api/summary/:origin/:destination", get(get_route_summary))
        .route("/api/routes/popular", get(get_popular_routes))
        .route("/api/demand/destinations", get(get_destination_demand))
        // Collection
        .route("/api/collect", post(post_collect))
        .route("/api/health", get(get_health))
        // State
        .with_state(state)
        // CORS for frontend
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::InvalidFilter(_) => StatusCode::BAD_REQUEST,
        AppError::SourceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AppError::InsightGenerationFailed { .. } | AppError::StoreCorruption { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response<T: Serialize>(error: AppError) -> Response {
    let status = status_for(&error);
    if !error.is_client_error() {
        warn!(error = %error, "Request failed");
    }
    (status, Json(ApiResponse::<T>::error(error.to_string()))).into_response()
}

fn parse_range(params: &HashMap<String, String>) -> Result<Option<DateRange>, AppError> {
    let filters = ViewFilters::parse(
        params
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "origin" | "destination"))
            .map(|(k, v)| (k.as_str(), v.as_str())),
    )?;
    Ok(filters.travel_range())
}

// ─────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────

/// GET /api/view?origin=SYD&destination=MEL&dateFrom=2024-01-01&dateTo=2024-01-31
async fn get_view(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.query.view_from_params(&params, None).await {
        Ok(view) => Json(ApiResponse::success(view)).into_response(),
        Err(e) => error_response::<()>(e),
    }
}

/// GET /api/summary/:origin/:destination - One route with insights
async fn get_route_summary(
    Path((origin, destination)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(route) = RouteKey::new(&origin, &destination) else {
        return error_response::<()>(AppError::InvalidFilter(format!(
            "invalid route {origin}-{destination}"
        )));
    };
    let range = match parse_range(&params) {
        Ok(range) => range,
        Err(e) => return error_response::<()>(e),
    };
    let view = state.query.route_view(&route, range, None).await;
    Json(ApiResponse::success(view)).into_response()
}

/// `limit` query parameter; missing or blank means `default`
fn parse_limit(params: &HashMap<String, String>, default: usize) -> Result<usize, AppError> {
    match params.get("limit").map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw.parse::<usize>().map_err(|_| {
            AppError::InvalidFilter(format!("limit must be a non-negative integer, got {raw:?}"))
        }),
    }
}

/// GET /api/routes/popular?limit=10
async fn get_popular_routes(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let limit = match parse_limit(&params, state.query.settings().popular_routes) {
        Ok(limit) => limit,
        Err(e) => return error_response::<()>(e),
    };
    let popular = state.query.popular_routes(limit.min(MAX_POPULAR_LIMIT));
    Json(ApiResponse::success(popular)).into_response()
}

/// GET /api/demand/destinations?limit=15
async fn get_destination_demand(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let limit = match parse_limit(&params, DESTINATION_DEMAND_LIMIT) {
        Ok(limit) => limit,
        Err(e) => return error_response::<()>(e),
    };
    let ranked = state.query.demand_by_destination(limit.min(MAX_POPULAR_LIMIT));
    Json(ApiResponse::success(ranked)).into_response()
}

/// POST /api/collect - On-demand collection
async fn post_collect(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: CollectRequest = if body.is_empty() {
        CollectRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return error_response::<()>(AppError::InvalidFilter(format!(
                    "malformed request body: {e}"
                )))
            }
        }
    };

    let routes = match &request.routes {
        None => state.routes.clone(),
        Some(raw) => {
            let parsed: Option<Vec<RouteKey>> = raw.iter().map(|r| RouteKey::parse(r)).collect();
            match parsed {
                Some(routes) if !routes.is_empty() => routes,
                _ => {
                    return error_response::<()>(AppError::InvalidFilter(format!(
                        "invalid routes {raw:?}"
                    )))
                }
            }
        }
    };

    let mut params = HashMap::new();
    if let Some(from) = request.date_from {
        params.insert("date_from".to_string(), from);
    }
    if let Some(to) = request.date_to {
        params.insert("date_to".to_string(), to);
    }
    let window = match ViewFilters::from_map(&params) {
        Ok(filters) => match (filters.date_from, filters.date_to) {
            (Some(from), Some(to)) => DateRange { from, to },
            (None, None) => state.schedule.window_at(Utc::now()),
            _ => {
                return error_response::<()>(AppError::InvalidFilter(
                    "dateFrom and dateTo must be given together".to_string(),
                ))
            }
        },
        Err(e) => return error_response::<()>(e),
    };
    if window.len_days() > MAX_COLLECT_DAYS {
        return error_response::<()>(AppError::InvalidFilter(format!(
            "collection window {window} exceeds {MAX_COLLECT_DAYS} days"
        )));
    }

    match state.collector.collect(&routes, window).await {
        Ok(report) => Json(ApiResponse::success(report)).into_response(),
        Err(e) => error_response::<()>(e),
    }
}

/// GET /api/health - Store size, collection recency and recovery warnings
async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse::success(state.health().await))
}
