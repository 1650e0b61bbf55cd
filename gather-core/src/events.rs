use chrono::{DateTime, Utc};
use gather_shared::{Event, EventDraft, EventId};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::geo::{self, NearbyQuery};
use crate::identity::{Identity, Role};
use crate::repository::{bounded, EventStore, RsvpLedger};
use crate::{CoreError, CoreResult};

/// An event together with its live attendance, counted from the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    #[serde(flatten)]
    pub event: Event,
    pub attendee_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyEventView {
    #[serde(flatten)]
    pub event: Event,
    pub distance_km: f64,
    pub attendee_count: u64,
}

/// Organizer-facing event management and attendee-facing discovery.
pub struct EventService {
    events: Arc<dyn EventStore>,
    ledger: Arc<dyn RsvpLedger>,
    storage_timeout: Duration,
}

impl EventService {
    pub fn new(events: Arc<dyn EventStore>, ledger: Arc<dyn RsvpLedger>, storage_timeout: Duration) -> Self {
        Self {
            events,
            ledger,
            storage_timeout,
        }
    }

    pub async fn create_event(&self, caller: &Identity, draft: EventDraft) -> CoreResult<EventView> {
        caller.require_role(Role::Organizer)?;
        validate_draft(&draft)?;

        let event = Event::from_draft(EventId::new(), caller.user_id, draft, Utc::now());
        let event = bounded(self.storage_timeout, self.events.insert_event(event)).await?;
        info!("Event {} created by organizer {}", event.id, caller.user_id);

        Ok(EventView {
            event,
            attendee_count: 0,
        })
    }

    pub async fn update_event(&self, caller: &Identity, id: EventId, draft: EventDraft) -> CoreResult<EventView> {
        validate_draft(&draft)?;

        let before = bounded(self.storage_timeout, self.events.get_event(id)).await?;
        let rescheduled = before.reschedules(&draft);
        let event = bounded(
            self.storage_timeout,
            self.events.update_event(caller.user_id, id, draft, Utc::now()),
        )
        .await?;
        let attendee_count = bounded(self.storage_timeout, self.ledger.count_active(id)).await?;

        if rescheduled && attendee_count > 0 {
            warn!(
                "Event {} moved in time or place with {} active RSVPs",
                id, attendee_count
            );
        }
        if let Some(capacity) = event.max_attendees {
            if attendee_count > u64::from(capacity) {
                warn!(
                    "Event {} capacity lowered to {} below {} active RSVPs",
                    id, capacity, attendee_count
                );
            }
        }
        info!("Event {} updated by organizer {}", id, caller.user_id);

        Ok(EventView { event, attendee_count })
    }

    pub async fn delete_event(&self, caller: &Identity, id: EventId) -> CoreResult<()> {
        bounded(self.storage_timeout, self.events.delete_event(caller.user_id, id)).await?;
        info!("Event {} deleted by organizer {}", id, caller.user_id);
        Ok(())
    }

    pub async fn get_event(&self, id: EventId) -> CoreResult<EventView> {
        let event = bounded(self.storage_timeout, self.events.get_event(id)).await?;
        self.with_count(event).await
    }

    pub async fn list_upcoming(&self, category: Option<&str>) -> CoreResult<Vec<EventView>> {
        let category = category.filter(|c| !c.trim().is_empty());
        let events = bounded(self.storage_timeout, self.events.list_upcoming(Utc::now(), category)).await?;
        self.with_counts(events).await
    }

    pub async fn list_mine(&self, caller: &Identity) -> CoreResult<Vec<EventView>> {
        let events = bounded(self.storage_timeout, self.events.list_by_organizer(caller.user_id)).await?;
        self.with_counts(events).await
    }

    /// Discovery: upcoming events within the query radius, soonest first.
    pub async fn find_nearby(&self, query: &NearbyQuery) -> CoreResult<Vec<NearbyEventView>> {
        self.find_nearby_at(query, Utc::now()).await
    }

    pub async fn find_nearby_at(&self, query: &NearbyQuery, now: DateTime<Utc>) -> CoreResult<Vec<NearbyEventView>> {
        query.validate()?;
        if query.is_empty_radius() {
            return Ok(Vec::new());
        }

        let candidates = bounded(
            self.storage_timeout,
            self.events.list_upcoming(now, query.category.as_deref()),
        )
        .await?;
        let scanned = candidates.len();
        let matches = geo::find_nearby(candidates, query, now)?;
        tracing::debug!(
            "Nearby query r={}km kept {} of {} upcoming events",
            query.radius_km,
            matches.len(),
            scanned
        );

        let mut views = Vec::with_capacity(matches.len());
        for nearby in matches {
            let attendee_count = bounded(self.storage_timeout, self.ledger.count_active(nearby.event.id)).await?;
            views.push(NearbyEventView {
                event: nearby.event,
                distance_km: nearby.distance_km,
                attendee_count,
            });
        }
        Ok(views)
    }

    async fn with_count(&self, event: Event) -> CoreResult<EventView> {
        let attendee_count = bounded(self.storage_timeout, self.ledger.count_active(event.id)).await?;
        Ok(EventView { event, attendee_count })
    }

    async fn with_counts(&self, events: Vec<Event>) -> CoreResult<Vec<EventView>> {
        let mut views = Vec::with_capacity(events.len());
        for event in events {
            views.push(self.with_count(event).await?);
        }
        Ok(views)
    }
}

/// Structural checks only; free text is taken as given.
fn validate_draft(draft: &EventDraft) -> CoreResult<()> {
    if !draft.location.in_range() {
        return Err(CoreError::InvalidArgument(format!(
            "location ({}, {}) is outside latitude [-90, 90] / longitude [-180, 180]",
            draft.location.latitude, draft.location.longitude
        )));
    }
    if draft.starts_at >= draft.ends_at {
        return Err(CoreError::InvalidArgument("event must start before it ends".to_string()));
    }
    if draft.max_attendees == Some(0) {
        return Err(CoreError::InvalidArgument(
            "max_attendees must be positive; omit it for unlimited".to_string(),
        ));
    }
    if let Some(price) = draft.price_cents {
        if price < 0 {
            return Err(CoreError::InvalidArgument("price cannot be negative".to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use gather_shared::{GeoPoint, ReminderSettings, UserId};

    fn service() -> (EventService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = EventService::new(store.clone(), store.clone(), Duration::from_secs(1));
        (service, store)
    }

    fn organizer() -> Identity {
        Identity::new(UserId::new(), "host@example.com", Role::Organizer)
    }

    fn draft_at(lat: f64, lng: f64, starts_in: ChronoDuration) -> EventDraft {
        let starts_at = Utc::now() + starts_in;
        EventDraft {
            title: "Night market".to_string(),
            description: Some("Street food".to_string()),
            category: "food".to_string(),
            location: GeoPoint::new(lat, lng),
            venue_name: None,
            address: None,
            image_url: None,
            starts_at,
            ends_at: starts_at + ChronoDuration::hours(4),
            max_attendees: Some(3),
            is_free: true,
            price_cents: None,
        }
    }

    #[tokio::test]
    async fn test_create_requires_organizer_and_valid_draft() {
        let (service, _) = service();
        let attendee = Identity::new(UserId::new(), "guest@example.com", Role::Attendee);

        let denied = service.create_event(&attendee, draft_at(37.0, -122.0, ChronoDuration::days(1))).await;
        assert!(matches!(denied, Err(CoreError::PermissionDenied(_))));

        let mut backwards = draft_at(37.0, -122.0, ChronoDuration::days(1));
        backwards.ends_at = backwards.starts_at - ChronoDuration::hours(1);
        let invalid = service.create_event(&organizer(), backwards).await;
        assert!(matches!(invalid, Err(CoreError::InvalidArgument(_))));

        let off_map = service.create_event(&organizer(), draft_at(120.0, 0.0, ChronoDuration::days(1))).await;
        assert!(matches!(off_map, Err(CoreError::InvalidArgument(_))));

        let mut zero = draft_at(37.0, -122.0, ChronoDuration::days(1));
        zero.max_attendees = Some(0);
        assert!(service.create_event(&organizer(), zero).await.is_err());
    }

    #[tokio::test]
    async fn test_views_carry_derived_attendance() {
        let (service, store) = service();
        let host = organizer();
        let created = service
            .create_event(&host, draft_at(37.7749, -122.4194, ChronoDuration::days(1)))
            .await
            .unwrap();
        assert_eq!(created.attendee_count, 0);

        store
            .create(created.event.id, UserId::new(), ReminderSettings::default())
            .await
            .unwrap();
        store
            .create(created.event.id, UserId::new(), ReminderSettings::default())
            .await
            .unwrap();

        let view = service.get_event(created.event.id).await.unwrap();
        assert_eq!(view.attendee_count, 2);

        let mine = service.list_mine(&host).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].attendee_count, 2);
    }

    #[tokio::test]
    async fn test_find_nearby_through_store() {
        let (service, _) = service();
        let host = organizer();
        let near = service
            .create_event(&host, draft_at(37.7749, -122.4194, ChronoDuration::days(1)))
            .await
            .unwrap();
        service
            .create_event(&host, draft_at(33.2783, -122.4194, ChronoDuration::days(1)))
            .await
            .unwrap();

        let found = service
            .find_nearby(&NearbyQuery::new(37.7749, -122.4194, 10.0))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].event.id, near.event.id);

        let none = service
            .find_nearby(&NearbyQuery::new(37.7749, -122.4194, 0.0))
            .await
            .unwrap();
        assert!(none.is_empty());

        let bad = service.find_nearby(&NearbyQuery::new(37.7749, -200.0, 10.0)).await;
        assert!(matches!(bad, Err(CoreError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_view_serializes_flat() {
        let (service, _) = service();
        let created = service
            .create_event(&organizer(), draft_at(37.7749, -122.4194, ChronoDuration::days(1)))
            .await
            .unwrap();

        let json = serde_json::to_value(&created).unwrap();
        assert_eq!(json["title"], "Night market");
        assert_eq!(json["attendee_count"], 0);
        assert_eq!(json["location"]["latitude"], 37.7749);
    }

    #[tokio::test]
    async fn test_update_and_delete_by_owner_only() {
        let (service, _) = service();
        let host = organizer();
        let other = organizer();
        let created = service
            .create_event(&host, draft_at(37.7749, -122.4194, ChronoDuration::days(1)))
            .await
            .unwrap();
        let id = created.event.id;

        let mut edit = draft_at(37.7749, -122.4194, ChronoDuration::days(2));
        edit.title = "Night market (moved)".to_string();

        let denied = service.update_event(&other, id, edit.clone()).await;
        assert!(matches!(denied, Err(CoreError::PermissionDenied(_))));

        let updated = service.update_event(&host, id, edit).await.unwrap();
        assert_eq!(updated.event.title, "Night market (moved)");

        assert!(matches!(
            service.delete_event(&other, id).await,
            Err(CoreError::PermissionDenied(_))
        ));
        service.delete_event(&host, id).await.unwrap();
        assert!(matches!(service.get_event(id).await, Err(CoreError::NotFound(_))));
    }
}
