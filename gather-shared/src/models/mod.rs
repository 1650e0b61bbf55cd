pub mod activity;
pub mod event;
pub mod ids;
pub mod rsvp;

pub use activity::{ActivityKind, RsvpActivity};
pub use event::{Event, EventDraft, GeoPoint};
pub use ids::{EventId, QrToken, RsvpId, UserId};
pub use rsvp::{ReminderSettings, Rsvp, RsvpStatus};
