use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EventId, UserId};

/// WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Latitude in [-90, 90] and longitude in [-180, 180], both finite.
    pub fn in_range(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A published event. Attendance is never stored here; it is counted from
/// the RSVP ledger on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub organizer_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub location: GeoPoint,
    pub venue_name: Option<String>,
    pub address: Option<String>,
    pub image_url: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// `None` means unlimited.
    pub max_attendees: Option<u32>,
    pub is_free: bool,
    pub price_cents: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Organizer-supplied fields for creating or replacing an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    pub location: GeoPoint,
    #[serde(default)]
    pub venue_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub max_attendees: Option<u32>,
    #[serde(default = "default_is_free")]
    pub is_free: bool,
    #[serde(default)]
    pub price_cents: Option<i64>,
}

fn default_is_free() -> bool {
    true
}

impl Event {
    pub fn from_draft(id: EventId, organizer_id: UserId, draft: EventDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            organizer_id,
            title: draft.title,
            description: draft.description,
            category: draft.category,
            location: draft.location,
            venue_name: draft.venue_name,
            address: draft.address,
            image_url: draft.image_url,
            starts_at: draft.starts_at,
            ends_at: draft.ends_at,
            max_attendees: draft.max_attendees,
            is_free: draft.is_free,
            price_cents: draft.price_cents,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces every organizer-editable field, keeping identity and ownership.
    pub fn apply(&mut self, draft: EventDraft, now: DateTime<Utc>) {
        let id = self.id;
        let organizer_id = self.organizer_id;
        let created_at = self.created_at;
        *self = Self::from_draft(id, organizer_id, draft, created_at);
        self.updated_at = now;
    }

    /// True when the draft moves the event in time or space.
    pub fn reschedules(&self, draft: &EventDraft) -> bool {
        self.starts_at != draft.starts_at
            || self.ends_at != draft.ends_at
            || self.location != draft.location
    }
}
