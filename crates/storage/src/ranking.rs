use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::Result;

/// One participant's current position material in an event's ranking.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RankedScore {
    pub participant_id: Uuid,
    pub display_name: String,
    pub kind: String,
    pub score: i64,
}

/// Ordered per-event score index. Upserts overwrite a participant's previous
/// score; `top_k` returns entries in non-increasing score order. Tie order
/// between equal scores is undefined here; mode-dependent tie-breaking
/// belongs to the read path.
#[async_trait]
pub trait RankingStore: Send + Sync {
    async fn upsert(&self, event_id: Uuid, entry: RankedScore) -> Result<()>;
    async fn top_k(&self, event_id: Uuid, k: usize) -> Result<Vec<RankedScore>>;
}

/// Standings-table backend shared by all worker processes. Metadata is
/// denormalized into the row so top-K reads need no join.
pub struct PgRankingStore {
    pool: PgPool,
}

impl PgRankingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RankingStore for PgRankingStore {
    async fn upsert(&self, event_id: Uuid, entry: RankedScore) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_standings (event_id, participant_id, display_name, kind, total, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (event_id, participant_id) DO UPDATE
                SET display_name = EXCLUDED.display_name,
                    kind = EXCLUDED.kind,
                    total = EXCLUDED.total,
                    updated_at = now()
            "#,
        )
        .bind(event_id)
        .bind(entry.participant_id)
        .bind(&entry.display_name)
        .bind(&entry.kind)
        .bind(entry.score)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn top_k(&self, event_id: Uuid, k: usize) -> Result<Vec<RankedScore>> {
        let entries = sqlx::query_as::<_, RankedScore>(
            r#"
            SELECT participant_id, display_name, kind, total AS score
            FROM event_standings
            WHERE event_id = $1
            ORDER BY total DESC
            LIMIT $2
            "#,
        )
        .bind(event_id)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[derive(Debug, Clone)]
struct ScoreMeta {
    display_name: String,
    kind: String,
}

#[derive(Default)]
struct EventScores {
    // Keyed by (score, participant) so reverse iteration yields descending
    // score order; the index tracks each participant's live key for removal.
    by_score: BTreeMap<(i64, Uuid), ScoreMeta>,
    index: HashMap<Uuid, i64>,
}

/// In-process backend for single-node deployments and tests. O(log n)
/// upsert, O(k) top-K.
#[derive(Default)]
pub struct MemoryRankingStore {
    events: RwLock<HashMap<Uuid, EventScores>>,
}

impl MemoryRankingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RankingStore for MemoryRankingStore {
    async fn upsert(&self, event_id: Uuid, entry: RankedScore) -> Result<()> {
        let mut events = self.events.write().unwrap();
        let scores = events.entry(event_id).or_default();

        if let Some(previous) = scores.index.remove(&entry.participant_id) {
            scores.by_score.remove(&(previous, entry.participant_id));
        }

        scores.index.insert(entry.participant_id, entry.score);
        scores.by_score.insert(
            (entry.score, entry.participant_id),
            ScoreMeta {
                display_name: entry.display_name,
                kind: entry.kind,
            },
        );

        Ok(())
    }

    async fn top_k(&self, event_id: Uuid, k: usize) -> Result<Vec<RankedScore>> {
        let events = self.events.read().unwrap();
        let Some(scores) = events.get(&event_id) else {
            return Ok(Vec::new());
        };

        let entries = scores
            .by_score
            .iter()
            .rev()
            .take(k)
            .map(|((score, participant_id), meta)| RankedScore {
                participant_id: *participant_id,
                display_name: meta.display_name.clone(),
                kind: meta.kind.clone(),
                score: *score,
            })
            .collect();

        Ok(entries)
    }
}
