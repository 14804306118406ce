use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// A single scoring decision pushed onto the ingestion queue by the judging
/// surface. One live record exists per (event, participant, judge, criterion)
/// tuple; a resubmission of the same tuple replaces the previous value.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScoreMessage {
    pub event_id: Uuid,
    pub participant_id: Uuid,
    pub judge_user_id: Uuid,
    #[validate(length(min = 1, max = 128))]
    pub criterion: String,
    pub value: Decimal,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
    #[validate(length(max = 256))]
    pub idempotency_key: Option<String>,
}

impl ScoreMessage {
    /// Idempotency key, with empty strings treated as absent.
    pub fn claim_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Totals are floored to an integer once, after summation, so ranking only
/// ever compares integers even when individual scores are fractional.
pub fn floor_total(sum: Decimal) -> i64 {
    sum.floor().to_i64().unwrap_or_else(|| {
        // Saturate on sums outside the i64 range rather than panic.
        if sum.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        }
    })
}
