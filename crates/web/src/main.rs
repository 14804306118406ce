use anyhow::Context;
use axum::Router;
use storage::Database;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod cache;
mod config;
mod error;
mod features;
mod state;

use cache::{CacheConfig, PgCacheStore, SwrCache};
use config::Config;
use state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        features::leaderboard::handlers::get_leaderboard,
        features::metrics::handlers::get_metrics,
        features::metrics::handlers::health,
    ),
    components(
        schemas(
            storage::dto::leaderboard::LeaderboardPage,
            storage::dto::leaderboard::RankEntry,
            storage::dto::leaderboard::RankingMode,
            storage::dto::common::PaginationMeta,
            cache::CacheMetrics,
        )
    ),
    tags(
        (name = "leaderboard", description = "Public leaderboard endpoints"),
        (name = "operations", description = "Operational endpoints"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(true)
        .init();

    tracing::info!("Starting leaderboard API");

    let config = Config::from_env().context("Failed to load API configuration")?;

    let db = Database::new(&config.database_url)
        .await
        .context("Failed to initialize database")?;
    db.run_migrations()
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database ready");

    let shared_store = config
        .cache_enabled
        .then(|| PgCacheStore::new(db.pool().clone()));
    let cache = SwrCache::new(
        CacheConfig {
            fresh_ttl: config.cache_fresh_ttl,
            stale_multiplier: config.cache_stale_multiplier,
        },
        shared_store,
    );

    if config.cache_enabled {
        tokio::spawn(cache::run_invalidation_listener(
            db.pool().clone(),
            cache.clone(),
        ));
    }

    let state = AppState {
        db,
        cache,
        read: (&config).into(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api/events", features::leaderboard::routes::routes())
        .nest("/api", features::metrics::routes::routes())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .with_state(state);

    let bind_address = format!("{}:{}", config.host, config.port);
    tracing::info!("Listening on http://{}", bind_address);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
