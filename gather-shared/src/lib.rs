pub mod models;
pub mod pii;

pub use models::{
    ActivityKind, Event, EventDraft, EventId, GeoPoint, QrToken, ReminderSettings, Rsvp,
    RsvpActivity, RsvpId, RsvpStatus, UserId,
};
