use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::cache::CacheMetrics;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/metrics",
    responses(
        (status = 200, description = "Cache counter snapshot", body = CacheMetrics)
    ),
    tag = "operations"
)]
pub async fn get_metrics(State(state): State<AppState>) -> Json<CacheMetrics> {
    Json(state.cache.metrics())
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is up")
    ),
    tag = "operations"
)]
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
