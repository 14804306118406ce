use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use storage::dto::common::{PaginationMeta, PaginationParams};
use storage::dto::leaderboard::{LeaderboardPage, LeaderboardQuery, RankEntry, RankingMode};
use storage::error::Result as StorageResult;
use storage::repository::leaderboard::{LeaderboardRepository, StandingRow};

use crate::error::{WebError, WebResult};
use crate::state::AppState;

/// Paginated, ranked leaderboard for one event. The cache/compute future
/// races a fixed deadline; if the deadline wins, a trimmed top-N answers
/// with `partial: true` while the losing compute keeps running and commits
/// its result to the cache for subsequent reads.
pub async fn get_leaderboard(
    state: &AppState,
    slug: &str,
    query: &LeaderboardQuery,
) -> WebResult<LeaderboardPage> {
    let event = LeaderboardRepository::new(state.db.pool())
        .find_event_by_slug(slug)
        .await?;

    let pagination = query.pagination;
    let mode = query.mode;
    let event_id = event.event_id;

    let pool = state.db.pool().clone();
    let compute = move || compute_page(pool, event_id, mode, pagination);

    // Differently-sorted views must never collide in the cache.
    let key = cache_key(event_id, &pagination, mode);

    let primary: Pin<Box<dyn Future<Output = StorageResult<LeaderboardPage>> + Send>> =
        if state.read.cache_enabled {
            let cache = state.cache.clone();
            Box::pin(async move { cache.get_or_set(&key, compute).await })
        } else {
            Box::pin(compute())
        };

    let fallback_pool = state.db.pool().clone();
    let fallback_n = state.read.fallback_top_n;
    let fallback = async move { fallback_page(&fallback_pool, event_id, fallback_n).await };

    let (page, degraded) =
        race_with_fallback(state.read.fallback_timeout, primary, fallback).await?;
    if degraded {
        tracing::warn!(%slug, "leaderboard compute missed its deadline; served trimmed fallback");
    }

    Ok(page)
}

fn cache_key(event_id: Uuid, pagination: &PaginationParams, mode: RankingMode) -> String {
    format!(
        "leaderboard:{}:{}:{}:{}",
        event_id,
        pagination.page,
        pagination.page_size,
        mode.as_str()
    )
}

async fn compute_page(
    pool: PgPool,
    event_id: Uuid,
    mode: RankingMode,
    pagination: PaginationParams,
) -> StorageResult<LeaderboardPage> {
    let repo = LeaderboardRepository::new(&pool);

    let total_items = repo.count_standings(event_id).await?;
    let rows = repo
        .fetch_page(event_id, mode, pagination.offset(), pagination.limit())
        .await?;

    let offset = pagination.offset();
    let participants = rows
        .into_iter()
        .enumerate()
        .map(|(index, row)| rank_entry(row, offset + index as i64 + 1))
        .collect();

    Ok(LeaderboardPage {
        participants,
        pagination: PaginationMeta::new(pagination.page, pagination.page_size, total_items),
        partial: false,
    })
}

/// Narrow degraded response: top-N only, no pagination, no tie-break, and no
/// COUNT round trip.
async fn fallback_page(
    pool: &PgPool,
    event_id: Uuid,
    top_n: i64,
) -> StorageResult<LeaderboardPage> {
    let rows = LeaderboardRepository::new(pool).top_n(event_id, top_n).await?;

    let total = rows.len() as i64;
    let participants: Vec<RankEntry> = rows
        .into_iter()
        .enumerate()
        .map(|(index, row)| rank_entry(row, index as i64 + 1))
        .collect();

    Ok(LeaderboardPage {
        participants,
        pagination: PaginationMeta::new(1, top_n.max(1) as u32, total),
        partial: true,
    })
}

fn rank_entry(row: StandingRow, rank: i64) -> RankEntry {
    RankEntry {
        participant_id: row.participant_id,
        name: row.display_name,
        kind: row.kind,
        score: row.total,
        rank,
        duration_ms: row.duration_ms,
    }
}

/// Wait on the primary compute up to `deadline`, then answer from the
/// fallback. The loser is detached rather than cancelled so its result can
/// still reach the cache. A primary that fails outright also falls through
/// to the trimmed fallback; only a fallback failure is fatal.
pub(crate) async fn race_with_fallback<T, P, FB>(
    deadline: Duration,
    primary: P,
    fallback: FB,
) -> WebResult<(T, bool)>
where
    T: Send + 'static,
    P: Future<Output = StorageResult<T>> + Send + 'static,
    FB: Future<Output = StorageResult<T>>,
{
    let mut handle = tokio::spawn(primary);

    tokio::select! {
        joined = &mut handle => match joined {
            Ok(Ok(value)) => Ok((value, false)),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "primary compute failed; trying trimmed fallback");
                Ok((fallback.await?, true))
            }
            Err(err) => Err(WebError::InternalServerError(err.to_string())),
        },
        _ = tokio::time::sleep(deadline) => {
            Ok((fallback.await?, true))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_fast_primary_wins() {
        let (value, degraded) = race_with_fallback(
            Duration::from_millis(100),
            async { Ok(1u32) },
            async { Ok(2u32) },
        )
        .await
        .unwrap();

        assert_eq!(value, 1);
        assert!(!degraded);
    }

    #[tokio::test]
    async fn test_slow_primary_degrades_to_fallback() {
        let (value, degraded) = race_with_fallback(
            Duration::from_millis(20),
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(1u32)
            },
            async { Ok(2u32) },
        )
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert!(degraded);
    }

    #[tokio::test]
    async fn test_losing_primary_is_not_cancelled() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let (_, degraded) = race_with_fallback(
            Duration::from_millis(20),
            async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(1u32)
            },
            async { Ok(2u32) },
        )
        .await
        .unwrap();
        assert!(degraded);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_primary_falls_back_partial() {
        let (value, degraded) = race_with_fallback(
            Duration::from_millis(100),
            async {
                Err(storage::error::StorageError::ConstraintViolation(
                    "standings unavailable".into(),
                ))
            },
            async { Ok(7u32) },
        )
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert!(degraded);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_fatal() {
        let result: WebResult<(u32, bool)> = race_with_fallback(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(1u32)
            },
            async {
                Err(storage::error::StorageError::ConstraintViolation(
                    "standings unavailable".into(),
                ))
            },
        )
        .await;

        assert!(result.is_err());
    }
}
