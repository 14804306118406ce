use sqlx::{FromRow, PgPool, QueryBuilder};
use uuid::Uuid;

use crate::dto::leaderboard::RankingMode;
use crate::error::{Result, StorageError};

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub event_id: Uuid,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct StandingRow {
    pub participant_id: Uuid,
    pub display_name: String,
    pub kind: String,
    pub total: i64,
    pub duration_ms: Option<i64>,
}

pub struct LeaderboardRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> LeaderboardRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_event_by_slug(&self, slug: &str) -> Result<EventRow> {
        sqlx::query_as::<_, EventRow>(
            r#"
            SELECT event_id, slug, name
            FROM events
            WHERE slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(self.pool)
        .await?
        .ok_or(StorageError::NotFound)
    }

    pub async fn count_standings(&self, event_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM event_standings WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }

    /// One ordered page of standings. `speed_score` breaks score ties by
    /// cumulative duration ascending; participants with no recorded duration
    /// sort last within their score.
    pub async fn fetch_page(
        &self,
        event_id: Uuid,
        mode: RankingMode,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<StandingRow>> {
        let mut query = QueryBuilder::new(
            r#"
            SELECT participant_id, display_name, kind, total, duration_ms
            FROM event_standings
            WHERE event_id =
            "#,
        );
        query.push_bind(event_id);

        match mode {
            RankingMode::Score => {
                query.push(" ORDER BY total DESC, display_name ASC");
            }
            RankingMode::SpeedScore => {
                query.push(" ORDER BY total DESC, duration_ms ASC NULLS LAST, display_name ASC");
            }
        }

        query.push(" LIMIT ");
        query.push_bind(limit);
        query.push(" OFFSET ");
        query.push_bind(offset);

        let rows = query.build_query_as().fetch_all(self.pool).await?;

        Ok(rows)
    }

    /// Narrow fallback query used when the full computation misses its
    /// deadline: top-N only, no pagination, no tie-break.
    pub async fn top_n(&self, event_id: Uuid, n: i64) -> Result<Vec<StandingRow>> {
        let rows = sqlx::query_as::<_, StandingRow>(
            r#"
            SELECT participant_id, display_name, kind, total, duration_ms
            FROM event_standings
            WHERE event_id = $1
            ORDER BY total DESC
            LIMIT $2
            "#,
        )
        .bind(event_id)
        .bind(n)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }
}
