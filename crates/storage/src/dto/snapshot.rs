use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SNAPSHOT_MESSAGE_TYPE: &str = "leaderboard";

/// Broadcast payload pushed to connected viewers after an accepted score.
/// Best-effort: subscribers that miss one snapshot catch up on the next, and
/// the read path stays the source of truth for reconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardSnapshot {
    #[serde(rename = "type")]
    pub message_type: String,
    pub event_id: Uuid,
    pub entries: Vec<SnapshotEntry>,
    /// Milliseconds since the Unix epoch, monotonically increasing across
    /// snapshots of the same event under normal clock behavior.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub participant_id: Uuid,
    pub name: String,
    pub kind: String,
    pub score: i64,
    pub rank: i64,
}

impl LeaderboardSnapshot {
    pub fn new(event_id: Uuid, entries: Vec<SnapshotEntry>) -> Self {
        Self {
            message_type: SNAPSHOT_MESSAGE_TYPE.to_string(),
            event_id,
            entries,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}
