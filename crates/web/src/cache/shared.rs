use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgListener;
use sqlx::{FromRow, types::Json};

use storage::error::Result as StorageResult;

use super::{StoredEntry, SwrCache};

/// Channel peer processes listen on to drop superseded local copies.
pub const INVALIDATION_CHANNEL: &str = "cache_invalidations";

#[derive(FromRow)]
struct CacheRow {
    payload: Json<serde_json::Value>,
    fresh_until: chrono::DateTime<chrono::Utc>,
    stale_until: chrono::DateTime<chrono::Utc>,
}

/// Cross-process cache backend over the `cache_entries` table.
#[derive(Clone)]
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) async fn get(&self, key: &str) -> StorageResult<Option<StoredEntry>> {
        // Entries past stale_until are dead; filtering here doubles as lazy
        // eviction for readers.
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT payload, fresh_until, stale_until
            FROM cache_entries
            WHERE key = $1 AND stale_until > now()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| StoredEntry {
            payload: row.payload.0,
            fresh_until: row.fresh_until,
            stale_until: row.stale_until,
        }))
    }

    pub(crate) async fn put(&self, key: &str, entry: &StoredEntry) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, payload, fresh_until, stale_until)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE
                SET payload = EXCLUDED.payload,
                    fresh_until = EXCLUDED.fresh_until,
                    stale_until = EXCLUDED.stale_until
            "#,
        )
        .bind(key)
        .bind(Json(&entry.payload))
        .bind(entry.fresh_until)
        .bind(entry.stale_until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub(crate) async fn notify_invalidation(&self, key: &str) -> StorageResult<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(INVALIDATION_CHANNEL)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Long-running listener applying peer invalidations to the local backend.
/// Reconnects with backoff; a broken listener only delays eviction, the
/// stale window still bounds how long outdated data survives.
pub async fn run_invalidation_listener(pool: PgPool, cache: SwrCache) {
    loop {
        if let Err(err) = listen(&pool, &cache).await {
            tracing::warn!(error = %err, "cache invalidation listener disconnected; retrying");
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

async fn listen(pool: &PgPool, cache: &SwrCache) -> sqlx::Result<()> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(INVALIDATION_CHANNEL).await?;

    loop {
        let notification = listener.recv().await?;
        cache.drop_local(notification.payload());
    }
}
