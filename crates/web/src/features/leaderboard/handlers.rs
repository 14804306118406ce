use axum::{
    Json,
    extract::{Path, Query, State},
};

use storage::dto::leaderboard::{LeaderboardPage, LeaderboardQuery};

use crate::error::WebError;
use crate::state::AppState;

use super::services;

#[utoipa::path(
    get,
    path = "/api/events/{slug}/leaderboard",
    params(
        ("slug" = String, Path, description = "Event slug"),
        LeaderboardQuery
    ),
    responses(
        (status = 200, description = "Leaderboard page retrieved successfully", body = LeaderboardPage),
        (status = 400, description = "Invalid query parameters"),
        (status = 404, description = "Event not found")
    ),
    tag = "leaderboard"
)]
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardPage>, WebError> {
    query.validate().map_err(WebError::BadRequest)?;

    let page = services::get_leaderboard(&state, &slug, &query).await?;

    Ok(Json(page))
}
