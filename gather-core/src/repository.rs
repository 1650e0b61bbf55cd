use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gather_shared::{Event, EventDraft, EventId, QrToken, ReminderSettings, Rsvp, UserId};
use std::future::Future;
use std::time::Duration;

use crate::{CoreError, CoreResult};

/// Event records and their ownership.
///
/// Mutations take the acting user and must check ownership in the same
/// step that writes, so a concurrent transfer or delete cannot slip between
/// the check and the write.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: Event) -> CoreResult<Event>;

    /// Fails `NotFound` when absent.
    async fn get_event(&self, id: EventId) -> CoreResult<Event>;

    /// Replaces the editable fields. `NotFound` or `PermissionDenied`.
    async fn update_event(
        &self,
        actor: UserId,
        id: EventId,
        draft: EventDraft,
        now: DateTime<Utc>,
    ) -> CoreResult<Event>;

    /// Removes the event and every RSVP attached to it.
    async fn delete_event(&self, actor: UserId, id: EventId) -> CoreResult<()>;

    /// Events starting at or after `now`, optionally narrowed to one category.
    async fn list_upcoming(&self, now: DateTime<Utc>, category: Option<&str>) -> CoreResult<Vec<Event>>;

    async fn list_by_organizer(&self, organizer: UserId) -> CoreResult<Vec<Event>>;

    async fn is_owned_by(&self, id: EventId, user: UserId) -> CoreResult<bool> {
        Ok(self.get_event(id).await?.organizer_id == user)
    }

    async fn capacity(&self, id: EventId) -> CoreResult<Option<u32>> {
        Ok(self.get_event(id).await?.max_attendees)
    }
}

/// Authoritative RSVP records.
///
/// `create` is the only way in and it enforces both the one-per-user rule and
/// the event's capacity atomically with the insert.
#[async_trait]
pub trait RsvpLedger: Send + Sync {
    /// `AlreadyExists`, `AtCapacity` or `NotFound` (event gone).
    async fn create(&self, event_id: EventId, user_id: UserId, reminder: ReminderSettings) -> CoreResult<Rsvp>;

    async fn find_by_token(&self, token: &QrToken) -> CoreResult<Rsvp>;

    async fn find_by_event_and_user(&self, event_id: EventId, user_id: UserId) -> CoreResult<Rsvp>;

    async fn count_active(&self, event_id: EventId) -> CoreResult<u64>;

    async fn count_checked_in(&self, event_id: EventId) -> CoreResult<u64>;

    /// One-way. `AlreadyCheckedIn` leaves the record as it was.
    async fn check_in(&self, token: &QrToken) -> CoreResult<Rsvp>;

    /// Removes a not-yet-checked-in RSVP and returns it.
    /// `NotFound`, or `InvalidState` after check-in.
    async fn cancel(&self, event_id: EventId, user_id: UserId) -> CoreResult<Rsvp>;

    async fn list_for_user(&self, user_id: UserId) -> CoreResult<Vec<Rsvp>>;

    async fn list_for_event(&self, event_id: EventId) -> CoreResult<Vec<Rsvp>>;

    async fn update_reminder(
        &self,
        event_id: EventId,
        user_id: UserId,
        reminder: ReminderSettings,
    ) -> CoreResult<Rsvp>;
}

/// Runs a storage call under a deadline. Elapsed calls surface as
/// `CoreError::Timeout`; nothing is retried here.
pub async fn bounded<T, F>(limit: Duration, call: F) -> CoreResult<T>
where
    F: Future<Output = CoreResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!("Storage call exceeded {:?}", limit);
            Err(CoreError::Timeout(limit))
        }
    }
}
