use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EventId, QrToken, RsvpId, UserId};

/// Reminder intent recorded with an RSVP. Nothing in this system sends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSettings {
    pub enabled: bool,
    pub minutes_before: u32,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            minutes_before: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RsvpStatus {
    Confirmed,
    CheckedIn,
}

/// An attendee's reservation. Only active reservations exist as records:
/// cancelling removes the row, checking in is one-way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rsvp {
    pub id: RsvpId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub qr_token: QrToken,
    pub checked_in: bool,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub reminder: ReminderSettings,
    pub created_at: DateTime<Utc>,
}

impl Rsvp {
    pub fn new(
        event_id: EventId,
        user_id: UserId,
        qr_token: QrToken,
        reminder: ReminderSettings,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RsvpId::new(),
            event_id,
            user_id,
            qr_token,
            checked_in: false,
            checked_in_at: None,
            reminder,
            created_at: now,
        }
    }

    pub fn status(&self) -> RsvpStatus {
        if self.checked_in {
            RsvpStatus::CheckedIn
        } else {
            RsvpStatus::Confirmed
        }
    }

    /// Stamps the check-in. Returns `false` and leaves the record untouched if
    /// it was already checked in.
    pub fn mark_checked_in(&mut self, at: DateTime<Utc>) -> bool {
        if self.checked_in {
            return false;
        }
        self.checked_in = true;
        self.checked_in_at = Some(at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_in_is_one_way() {
        let created = Utc::now();
        let mut rsvp = Rsvp::new(
            EventId::new(),
            UserId::new(),
            QrToken::new("RSVP-test"),
            ReminderSettings::default(),
            created,
        );
        assert_eq!(rsvp.status(), RsvpStatus::Confirmed);

        let first = created + chrono::Duration::hours(1);
        assert!(rsvp.mark_checked_in(first));
        assert!(!rsvp.mark_checked_in(first + chrono::Duration::minutes(1)));

        assert_eq!(rsvp.status(), RsvpStatus::CheckedIn);
        assert_eq!(rsvp.checked_in_at, Some(first));
    }
}
