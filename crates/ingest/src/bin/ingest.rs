use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ingest::{IngestionWorker, WorkerConfig};
use storage::Database;
use storage::idempotency::PgIdempotencyGuard;
use storage::publish::PgNotifyPublisher;
use storage::queue::PgScoreQueue;
use storage::ranking::PgRankingStore;
use storage::repository::scores::PgScoreStore;

#[derive(Parser)]
#[command(name = "lb-ingest")]
#[command(about = "Leaderboard score ingestion worker", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 500)]
    poll_interval_ms: u64,

    #[arg(long, env = "PUBLISH_TOP_K", default_value_t = 50)]
    publish_top_k: usize,

    #[arg(long, env = "IDEMPOTENCY_TTL_HOURS", default_value_t = 24)]
    idempotency_ttl_hours: u64,

    #[arg(long, env = "QUEUE_VISIBILITY_TIMEOUT_SECS", default_value_t = 30)]
    queue_visibility_timeout_secs: u64,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("ingest={},storage={}", log_level, log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = Database::new(&cli.database_url).await?;
    let pool = db.pool().clone();

    let config = WorkerConfig {
        publish_top_k: cli.publish_top_k,
        idempotency_ttl: Duration::from_secs(cli.idempotency_ttl_hours * 60 * 60),
        poll_interval: Duration::from_millis(cli.poll_interval_ms),
    };

    let worker = IngestionWorker::new(
        Arc::new(PgScoreQueue::new(
            pool.clone(),
            Duration::from_secs(cli.queue_visibility_timeout_secs),
        )),
        Arc::new(PgIdempotencyGuard::new(pool.clone())),
        Arc::new(PgScoreStore::new(pool.clone())),
        Arc::new(PgRankingStore::new(pool.clone())),
        Arc::new(PgNotifyPublisher::new(pool)),
        config,
    );

    worker.run().await?;

    Ok(())
}
