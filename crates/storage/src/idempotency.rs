use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::Result;

/// Claim-once guard shared by all ingestion workers. The first `claim` for a
/// key within the TTL window returns true; every later call returns false
/// until the claim expires. Correctness must hold across processes, so the
/// Postgres backend performs the check-and-set in a single statement.
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Give a claim back. Called when the work behind a successful claim
    /// failed before completion, so the redelivered message can claim again
    /// instead of being skipped for the rest of the TTL.
    async fn release(&self, key: &str) -> Result<()>;
}

pub struct PgIdempotencyGuard {
    pool: PgPool,
}

impl PgIdempotencyGuard {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyGuard for PgIdempotencyGuard {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        // Atomic set-if-absent: the upsert only replaces an expired claim, so
        // exactly one caller gets a row back per TTL window.
        let row = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO idempotency_claims (key, claimed_until)
            VALUES ($1, now() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE
                SET claimed_until = now() + make_interval(secs => $2)
                WHERE idempotency_claims.claimed_until < now()
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn release(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_claims WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// In-process fallback used in single-node deployments and tests.
#[derive(Default)]
pub struct MemoryIdempotencyGuard {
    claims: Mutex<HashMap<String, Instant>>,
}

impl MemoryIdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyGuard for MemoryIdempotencyGuard {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut claims = self.claims.lock().unwrap();

        if claims.len() > 4096 {
            claims.retain(|_, expires| *expires > now);
        }

        match claims.get(key) {
            Some(expires) if *expires > now => Ok(false),
            _ => {
                claims.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.claims.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_claim_wins() {
        let guard = MemoryIdempotencyGuard::new();
        let ttl = Duration::from_secs(60);

        assert!(guard.claim("abc123", ttl).await.unwrap());
        assert!(!guard.claim("abc123", ttl).await.unwrap());
        assert!(!guard.claim("abc123", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_distinct_keys_are_independent() {
        let guard = MemoryIdempotencyGuard::new();
        let ttl = Duration::from_secs(60);

        assert!(guard.claim("a", ttl).await.unwrap());
        assert!(guard.claim("b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_reopens_claim() {
        let guard = MemoryIdempotencyGuard::new();
        let ttl = Duration::from_secs(60);

        assert!(guard.claim("abc123", ttl).await.unwrap());
        assert!(!guard.claim("abc123", ttl).await.unwrap());

        guard.release("abc123").await.unwrap();
        assert!(guard.claim("abc123", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_reopens_after_expiry() {
        let guard = MemoryIdempotencyGuard::new();
        let ttl = Duration::from_millis(20);

        assert!(guard.claim("abc123", ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(guard.claim("abc123", ttl).await.unwrap());
    }
}
