use chrono::{DateTime, Utc};
use gather_shared::{
    ActivityKind, Event, EventId, QrToken, ReminderSettings, Rsvp, RsvpActivity, RsvpId, RsvpStatus, UserId,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::identity::Identity;
use crate::repository::{bounded, EventStore, RsvpLedger};
use crate::{CoreError, CoreResult};

/// What an attendee (or the organizer at the door) sees of one RSVP.
#[derive(Debug, Clone, Serialize)]
pub struct RsvpView {
    pub id: RsvpId,
    pub event_id: EventId,
    pub event_title: String,
    pub user_id: UserId,
    pub qr_token: QrToken,
    pub status: RsvpStatus,
    pub checked_in: bool,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub reminder: ReminderSettings,
    pub created_at: DateTime<Utc>,
}

impl RsvpView {
    fn new(rsvp: Rsvp, event: &Event) -> Self {
        Self {
            id: rsvp.id,
            event_id: rsvp.event_id,
            event_title: event.title.clone(),
            user_id: rsvp.user_id,
            status: rsvp.status(),
            qr_token: rsvp.qr_token,
            checked_in: rsvp.checked_in,
            checked_in_at: rsvp.checked_in_at,
            reminder: rsvp.reminder,
            created_at: rsvp.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub total: u64,
    pub checked_in: u64,
}

/// RSVP lifecycle: reserve, cancel, check in, and the read models around it.
///
/// Capacity and uniqueness are decided by the ledger in one atomic step;
/// this service only loads context, authorizes and reports.
pub struct RsvpService {
    events: Arc<dyn EventStore>,
    ledger: Arc<dyn RsvpLedger>,
    activity: broadcast::Sender<RsvpActivity>,
    storage_timeout: Duration,
}

impl RsvpService {
    pub fn new(
        events: Arc<dyn EventStore>,
        ledger: Arc<dyn RsvpLedger>,
        activity: broadcast::Sender<RsvpActivity>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            events,
            ledger,
            activity,
            storage_timeout,
        }
    }

    pub async fn rsvp(
        &self,
        event_id: EventId,
        caller: &Identity,
        reminder: Option<ReminderSettings>,
    ) -> CoreResult<RsvpView> {
        let event = self.load_event(event_id).await?;

        // capacity is checked inside the ledger's insert, never here
        let rsvp = bounded(
            self.storage_timeout,
            self.ledger.create(event_id, caller.user_id, reminder.unwrap_or_default()),
        )
        .await
        .map_err(|e| {
            if matches!(e, CoreError::AtCapacity { .. } | CoreError::AlreadyExists(_)) {
                warn!("RSVP by {} for event {} refused: {}", caller.user_id, event_id, e);
            }
            e
        })?;

        info!("User {} reserved a spot at event {}", caller.user_id, event_id);
        self.publish(&rsvp, ActivityKind::Reserved);
        Ok(RsvpView::new(rsvp, &event))
    }

    pub async fn cancel(&self, event_id: EventId, caller: &Identity) -> CoreResult<()> {
        let removed = bounded(self.storage_timeout, self.ledger.cancel(event_id, caller.user_id)).await?;
        info!("User {} cancelled RSVP {} for event {}", caller.user_id, removed.id, event_id);
        self.publish(&removed, ActivityKind::Cancelled);
        Ok(())
    }

    /// Door check-in by the event's organizer.
    pub async fn check_in(&self, token: &QrToken, requester: &Identity) -> CoreResult<RsvpView> {
        let rsvp = bounded(self.storage_timeout, self.ledger.find_by_token(token))
            .await
            .map_err(unknown_token)?;
        let event = bounded(self.storage_timeout, self.events.get_event(rsvp.event_id))
            .await
            .map_err(unknown_token)?;

        if event.organizer_id != requester.user_id {
            warn!(
                "User {} tried to check in an attendee of event {} they do not organize",
                requester.user_id, event.id
            );
            return Err(CoreError::PermissionDenied(
                "only the event organizer can check attendees in".to_string(),
            ));
        }

        let checked = bounded(self.storage_timeout, self.ledger.check_in(token))
            .await
            .map_err(unknown_token)?;

        info!("RSVP {} checked in at event {}", checked.id, event.id);
        self.publish(&checked, ActivityKind::CheckedIn);
        Ok(RsvpView::new(checked, &event))
    }

    pub async fn my_rsvp(&self, event_id: EventId, caller: &Identity) -> CoreResult<RsvpView> {
        let event = self.load_event(event_id).await?;
        let rsvp = bounded(
            self.storage_timeout,
            self.ledger.find_by_event_and_user(event_id, caller.user_id),
        )
        .await?;
        Ok(RsvpView::new(rsvp, &event))
    }

    pub async fn update_reminder(
        &self,
        event_id: EventId,
        caller: &Identity,
        reminder: ReminderSettings,
    ) -> CoreResult<RsvpView> {
        let event = self.load_event(event_id).await?;
        let rsvp = bounded(
            self.storage_timeout,
            self.ledger.update_reminder(event_id, caller.user_id, reminder),
        )
        .await?;
        Ok(RsvpView::new(rsvp, &event))
    }

    pub async fn list_for_user(&self, caller: &Identity) -> CoreResult<Vec<RsvpView>> {
        let rsvps = bounded(self.storage_timeout, self.ledger.list_for_user(caller.user_id)).await?;

        let mut views = Vec::with_capacity(rsvps.len());
        for rsvp in rsvps {
            match bounded(self.storage_timeout, self.events.get_event(rsvp.event_id)).await {
                Ok(event) => views.push(RsvpView::new(rsvp, &event)),
                // deleted between the two reads; its RSVPs went with it
                Err(CoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(views)
    }

    /// Attendee list, for the organizer only.
    pub async fn list_for_event(&self, event_id: EventId, requester: &Identity) -> CoreResult<Vec<RsvpView>> {
        let event = self.load_organized_event(event_id, requester).await?;
        let rsvps = bounded(self.storage_timeout, self.ledger.list_for_event(event_id)).await?;
        Ok(rsvps.into_iter().map(|rsvp| RsvpView::new(rsvp, &event)).collect())
    }

    pub async fn stats(&self, event_id: EventId) -> CoreResult<EventStats> {
        self.load_event(event_id).await?;
        let total = bounded(self.storage_timeout, self.ledger.count_active(event_id)).await?;
        let checked_in = bounded(self.storage_timeout, self.ledger.count_checked_in(event_id)).await?;
        Ok(EventStats { total, checked_in })
    }

    /// Live RSVP activity for one event, for its organizer. The receiver sees
    /// every event's activity; callers filter on `event_id`.
    pub async fn subscribe(
        &self,
        event_id: EventId,
        requester: &Identity,
    ) -> CoreResult<broadcast::Receiver<RsvpActivity>> {
        self.load_organized_event(event_id, requester).await?;
        Ok(self.activity.subscribe())
    }

    async fn load_event(&self, event_id: EventId) -> CoreResult<Event> {
        bounded(self.storage_timeout, self.events.get_event(event_id)).await
    }

    async fn load_organized_event(&self, event_id: EventId, requester: &Identity) -> CoreResult<Event> {
        let event = self.load_event(event_id).await?;
        if event.organizer_id != requester.user_id {
            return Err(CoreError::PermissionDenied(
                "only the event organizer can view its attendees".to_string(),
            ));
        }
        Ok(event)
    }

    fn publish(&self, rsvp: &Rsvp, kind: ActivityKind) {
        // no subscribers is the common case, not an error
        let _ = self.activity.send(RsvpActivity {
            event_id: rsvp.event_id,
            rsvp_id: rsvp.id,
            user_id: rsvp.user_id,
            kind,
            occurred_at: Utc::now().timestamp(),
        });
    }
}

/// A token whose RSVP (or event) cannot be found is reported as invalid.
fn unknown_token(e: CoreError) -> CoreError {
    match e {
        CoreError::NotFound(_) => CoreError::InvalidToken,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::ledger::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use gather_shared::{EventDraft, GeoPoint};

    struct Fixture {
        service: Arc<RsvpService>,
        store: Arc<MemoryStore>,
        organizer: Identity,
        event: Event,
        activity: broadcast::Receiver<RsvpActivity>,
    }

    async fn fixture(max_attendees: Option<u32>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let (tx, activity) = broadcast::channel(64);
        let service = Arc::new(RsvpService::new(store.clone(), store.clone(), tx, Duration::from_secs(1)));
        let organizer = Identity::new(UserId::new(), "host@example.com", Role::Organizer);

        let starts_at = Utc::now() + ChronoDuration::days(3);
        let draft = EventDraft {
            title: "Salsa social".to_string(),
            description: None,
            category: "dance".to_string(),
            location: GeoPoint::new(40.7128, -74.0060),
            venue_name: Some("Studio 4".to_string()),
            address: None,
            image_url: None,
            starts_at,
            ends_at: starts_at + ChronoDuration::hours(3),
            max_attendees,
            is_free: false,
            price_cents: Some(1500),
        };
        let event = store
            .insert_event(Event::from_draft(EventId::new(), organizer.user_id, draft, Utc::now()))
            .await
            .unwrap();

        Fixture {
            service,
            store,
            organizer,
            event,
            activity,
        }
    }

    fn attendee() -> Identity {
        Identity::new(UserId::new(), "guest@example.com", Role::Attendee)
    }

    #[tokio::test]
    async fn test_rsvp_returns_token_and_round_trips() {
        let mut fx = fixture(None).await;
        let guest = attendee();

        let view = fx.service.rsvp(fx.event.id, &guest, None).await.unwrap();
        assert_eq!(view.event_title, "Salsa social");
        assert_eq!(view.status, RsvpStatus::Confirmed);
        assert_eq!(view.reminder, ReminderSettings::default());

        let stored = fx.store.find_by_event_and_user(fx.event.id, guest.user_id).await.unwrap();
        assert_eq!(stored.qr_token, view.qr_token);

        let mine = fx.service.my_rsvp(fx.event.id, &guest).await.unwrap();
        assert_eq!(mine.qr_token, view.qr_token);

        let activity = fx.activity.try_recv().unwrap();
        assert_eq!(activity.kind, ActivityKind::Reserved);
        assert_eq!(activity.rsvp_id, view.id);
    }

    #[tokio::test]
    async fn test_rsvp_unknown_event_and_duplicates() {
        let fx = fixture(None).await;
        let guest = attendee();

        let missing = fx.service.rsvp(EventId::new(), &guest, None).await;
        assert!(matches!(missing, Err(CoreError::NotFound(_))));

        fx.service.rsvp(fx.event.id, &guest, None).await.unwrap();
        let again = fx.service.rsvp(fx.event.id, &guest, None).await;
        assert!(matches!(again, Err(CoreError::AlreadyExists(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_rsvps_respect_capacity() {
        let fx = fixture(Some(5)).await;

        let mut handles = Vec::new();
        for _ in 0..40 {
            let service = fx.service.clone();
            let event_id = fx.event.id;
            handles.push(tokio::spawn(async move { service.rsvp(event_id, &attendee(), None).await }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert!(matches!(e, CoreError::AtCapacity { capacity: 5 })),
            }
        }

        assert_eq!(accepted, 5);
        let stats = fx.service.stats(fx.event.id).await.unwrap();
        assert_eq!(stats, EventStats { total: 5, checked_in: 0 });
    }

    #[tokio::test]
    async fn test_check_in_by_organizer_once() {
        let fx = fixture(None).await;
        let guest = attendee();
        let view = fx.service.rsvp(fx.event.id, &guest, None).await.unwrap();

        let checked = fx.service.check_in(&view.qr_token, &fx.organizer).await.unwrap();
        assert!(checked.checked_in);
        assert_eq!(checked.status, RsvpStatus::CheckedIn);
        let stamped = checked.checked_in_at;

        let again = fx.service.check_in(&view.qr_token, &fx.organizer).await;
        assert!(matches!(again, Err(CoreError::AlreadyCheckedIn)));

        let stored = fx.store.find_by_token(&view.qr_token).await.unwrap();
        assert_eq!(stored.checked_in_at, stamped);
        assert_eq!(
            fx.service.stats(fx.event.id).await.unwrap(),
            EventStats { total: 1, checked_in: 1 }
        );
    }

    #[tokio::test]
    async fn test_check_in_authorization_and_unknown_token() {
        let fx = fixture(None).await;
        let guest = attendee();
        let view = fx.service.rsvp(fx.event.id, &guest, None).await.unwrap();

        let stranger = Identity::new(UserId::new(), "other@example.com", Role::Organizer);
        let denied = fx.service.check_in(&view.qr_token, &stranger).await;
        assert!(matches!(denied, Err(CoreError::PermissionDenied(_))));
        // the attendee cannot check themselves in either
        assert!(matches!(
            fx.service.check_in(&view.qr_token, &guest).await,
            Err(CoreError::PermissionDenied(_))
        ));
        assert!(!fx.store.find_by_token(&view.qr_token).await.unwrap().checked_in);

        // still denied once the token has been used
        fx.service.check_in(&view.qr_token, &fx.organizer).await.unwrap();
        assert!(matches!(
            fx.service.check_in(&view.qr_token, &stranger).await,
            Err(CoreError::PermissionDenied(_))
        ));

        let bogus = fx.service.check_in(&QrToken::new("RSVP-nope"), &fx.organizer).await;
        assert!(matches!(bogus, Err(CoreError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_cancel_before_and_after_check_in() {
        let mut fx = fixture(Some(1)).await;
        let guest = attendee();

        assert!(matches!(
            fx.service.cancel(fx.event.id, &guest).await,
            Err(CoreError::NotFound(_))
        ));

        fx.service.rsvp(fx.event.id, &guest, None).await.unwrap();
        fx.service.cancel(fx.event.id, &guest).await.unwrap();

        // the seat is free again for someone else
        let other = attendee();
        let view = fx.service.rsvp(fx.event.id, &other, None).await.unwrap();
        fx.service.check_in(&view.qr_token, &fx.organizer).await.unwrap();

        let refused = fx.service.cancel(fx.event.id, &other).await;
        assert!(matches!(refused, Err(CoreError::InvalidState(_))));
        assert!(fx.store.find_by_token(&view.qr_token).await.unwrap().checked_in);

        let kinds: Vec<ActivityKind> = std::iter::from_fn(|| fx.activity.try_recv().ok())
            .map(|a| a.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ActivityKind::Reserved,
                ActivityKind::Cancelled,
                ActivityKind::Reserved,
                ActivityKind::CheckedIn
            ]
        );
    }

    #[tokio::test]
    async fn test_lists_and_organizer_only_views() {
        let fx = fixture(None).await;
        let guest = attendee();
        fx.service.rsvp(fx.event.id, &guest, None).await.unwrap();
        fx.service.rsvp(fx.event.id, &attendee(), None).await.unwrap();

        let mine = fx.service.list_for_user(&guest).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].event_id, fx.event.id);

        let attendees = fx.service.list_for_event(fx.event.id, &fx.organizer).await.unwrap();
        assert_eq!(attendees.len(), 2);

        assert!(matches!(
            fx.service.list_for_event(fx.event.id, &guest).await,
            Err(CoreError::PermissionDenied(_))
        ));
        assert!(matches!(
            fx.service.subscribe(fx.event.id, &guest).await,
            Err(CoreError::PermissionDenied(_))
        ));
        assert!(fx.service.subscribe(fx.event.id, &fx.organizer).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_reminder() {
        let fx = fixture(None).await;
        let guest = attendee();
        let reminder = ReminderSettings { enabled: true, minutes_before: 120 };
        fx.service.rsvp(fx.event.id, &guest, Some(reminder)).await.unwrap();

        let off = ReminderSettings { enabled: false, minutes_before: 120 };
        let view = fx.service.update_reminder(fx.event.id, &guest, off).await.unwrap();
        assert_eq!(view.reminder, off);

        let nobody = fx.service.update_reminder(fx.event.id, &attendee(), off).await;
        assert!(matches!(nobody, Err(CoreError::NotFound(_))));
    }
}
