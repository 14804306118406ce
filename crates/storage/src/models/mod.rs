pub mod score;
pub mod standing;

pub use score::{ScoreMessage, floor_total};
pub use standing::{ParticipantRef, ParticipantStanding};
