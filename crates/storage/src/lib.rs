pub mod dto;
pub mod error;
pub mod idempotency;
pub mod models;
pub mod publish;
pub mod queue;
pub mod ranking;
pub mod repository;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use error::Result;

/// Connection handle shared by the web and ingestion processes.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}
