use serde::{Deserialize, Serialize};

use super::ids::{EventId, RsvpId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    Reserved,
    Cancelled,
    CheckedIn,
}

/// Broadcast after an RSVP mutation commits. Carries no credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsvpActivity {
    pub event_id: EventId,
    pub rsvp_id: RsvpId,
    pub user_id: UserId,
    pub kind: ActivityKind,
    pub occurred_at: i64,
}
