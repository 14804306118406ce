use axum::{Router, routing::get};

use crate::state::AppState;

use super::handlers::{get_metrics, health};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/health", get(health))
}
