pub mod events;
pub mod geo;
pub mod identity;
pub mod ledger;
pub mod repository;
pub mod rsvp;
pub mod token;

use std::time::Duration;

pub use events::{EventService, EventView, NearbyEventView};
pub use identity::{Identity, IdentityResolver, Role};
pub use ledger::MemoryStore;
pub use repository::{EventStore, RsvpLedger};
pub use rsvp::{EventStats, RsvpService, RsvpView};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Event is at full capacity ({capacity} attendees)")]
    AtCapacity { capacity: u32 },
    #[error("Invalid QR token")]
    InvalidToken,
    #[error("Attendee already checked in")]
    AlreadyCheckedIn,
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("Storage call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
