use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::{PaginationMeta, PaginationParams};

/// How a leaderboard view is ordered. `Score` ranks by total alone;
/// `SpeedScore` breaks score ties by cumulative elapsed duration, fastest
/// first, with participants lacking a recorded duration sorted last.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    #[default]
    Score,
    SpeedScore,
}

impl RankingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Score => "score",
            Self::SpeedScore => "speed_score",
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LeaderboardQuery {
    #[serde(flatten)]
    pub pagination: PaginationParams,
    #[serde(default)]
    pub mode: RankingMode,
}

impl LeaderboardQuery {
    pub fn validate(&self) -> Result<(), String> {
        self.pagination.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RankEntry {
    pub participant_id: Uuid,
    pub name: String,
    pub kind: String,
    pub score: i64,
    pub rank: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// One page of ranked standings. `partial` marks a degraded response: the
/// full computation missed its deadline and a trimmed top-N was served
/// instead.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardPage {
    pub participants: Vec<RankEntry>,
    pub pagination: PaginationMeta,
    pub partial: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults_to_score() {
        let query: LeaderboardQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.mode, RankingMode::Score);
    }

    #[test]
    fn test_mode_parses_snake_case() {
        let query: LeaderboardQuery =
            serde_json::from_str(r#"{"mode": "speed_score"}"#).unwrap();
        assert_eq!(query.mode, RankingMode::SpeedScore);
    }
}
