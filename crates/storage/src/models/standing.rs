use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Derived per-participant total for one event. Never mutated directly;
/// always rewritten from a full recompute over the participant's score
/// records. Display name and kind are denormalized here so ranked reads
/// need no join back to the participants table.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct ParticipantStanding {
    pub event_id: Uuid,
    pub participant_id: Uuid,
    pub display_name: String,
    pub kind: String,
    pub total: i64,
    pub duration_ms: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal participant metadata carried alongside ranking upserts.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct ParticipantRef {
    pub participant_id: Uuid,
    pub display_name: String,
    pub kind: String,
}
