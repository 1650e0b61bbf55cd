//! In-process implementation of [`EventStore`] and [`RsvpLedger`].
//!
//! Each event owns a partition guarded by its own mutex, so RSVP traffic for
//! one event never waits on another. The capacity check and the insert run
//! inside the same critical section. A separate index maps QR tokens to
//! their partition and is the single place token uniqueness is decided.
//!
//! Lock order is always `events` map, then a partition, then `tokens`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gather_shared::{Event, EventDraft, EventId, QrToken, ReminderSettings, Rsvp, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::repository::{EventStore, RsvpLedger};
use crate::token::{RandomTokenGenerator, TokenGenerator};
use crate::{CoreError, CoreResult};

const DEFAULT_TOKEN_ATTEMPTS: usize = 8;

struct Partition {
    event: Event,
    rsvps: HashMap<UserId, Rsvp>,
    /// Set when the event is deleted while someone still holds the Arc.
    removed: bool,
}

pub struct MemoryStore {
    events: RwLock<HashMap<EventId, Arc<Mutex<Partition>>>>,
    tokens: Mutex<HashMap<QrToken, (EventId, UserId)>>,
    token_gen: Arc<dyn TokenGenerator>,
    token_attempts: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_token_generator(Arc::new(RandomTokenGenerator::default()), DEFAULT_TOKEN_ATTEMPTS)
    }

    pub fn with_token_generator(token_gen: Arc<dyn TokenGenerator>, token_attempts: usize) -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            token_gen,
            token_attempts: token_attempts.max(1),
        }
    }

    async fn partition(&self, id: EventId) -> CoreResult<Arc<Mutex<Partition>>> {
        self.events
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("event {}", id)))
    }

    /// Reserves a token nobody holds yet. Regenerates on collision.
    async fn claim_token(&self, event_id: EventId, user_id: UserId) -> CoreResult<QrToken> {
        let mut tokens = self.tokens.lock().await;
        for attempt in 1..=self.token_attempts {
            let token = self.token_gen.generate();
            if !tokens.contains_key(&token) {
                tokens.insert(token.clone(), (event_id, user_id));
                return Ok(token);
            }
            warn!("QR token collision on attempt {} for event {}", attempt, event_id);
        }
        Err(CoreError::Unavailable(format!(
            "no unique QR token after {} attempts",
            self.token_attempts
        )))
    }

    async fn token_owner(&self, token: &QrToken) -> CoreResult<(EventId, UserId)> {
        self.tokens.lock().await.get(token).copied().ok_or_else(token_not_found)
    }

    async fn snapshot(&self) -> Vec<Arc<Mutex<Partition>>> {
        self.events.read().await.values().cloned().collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn live(partition: &Partition) -> CoreResult<()> {
    if partition.removed {
        return Err(CoreError::NotFound(format!("event {}", partition.event.id)));
    }
    Ok(())
}

fn token_not_found() -> CoreError {
    CoreError::NotFound("rsvp for token".to_string())
}

fn rsvp_not_found(event_id: EventId, user_id: UserId) -> CoreError {
    CoreError::NotFound(format!("rsvp for user {} on event {}", user_id, event_id))
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event(&self, event: Event) -> CoreResult<Event> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Err(CoreError::AlreadyExists(format!("event {}", event.id)));
        }
        events.insert(
            event.id,
            Arc::new(Mutex::new(Partition {
                event: event.clone(),
                rsvps: HashMap::new(),
                removed: false,
            })),
        );
        Ok(event)
    }

    async fn get_event(&self, id: EventId) -> CoreResult<Event> {
        let partition = self.partition(id).await?;
        let partition = partition.lock().await;
        live(&partition)?;
        Ok(partition.event.clone())
    }

    async fn update_event(
        &self,
        actor: UserId,
        id: EventId,
        draft: EventDraft,
        now: DateTime<Utc>,
    ) -> CoreResult<Event> {
        let partition = self.partition(id).await?;
        let mut partition = partition.lock().await;
        live(&partition)?;
        if partition.event.organizer_id != actor {
            return Err(CoreError::PermissionDenied(format!("event {} belongs to another organizer", id)));
        }
        partition.event.apply(draft, now);
        Ok(partition.event.clone())
    }

    async fn delete_event(&self, actor: UserId, id: EventId) -> CoreResult<()> {
        let mut events = self.events.write().await;
        let partition = events
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("event {}", id)))?;
        let mut partition = partition.lock().await;
        if partition.event.organizer_id != actor {
            return Err(CoreError::PermissionDenied(format!("event {} belongs to another organizer", id)));
        }

        // no await past this point, so a dropped call cannot half-delete
        let mut tokens = self.tokens.lock().await;
        events.remove(&id);
        partition.removed = true;
        for (_, rsvp) in partition.rsvps.drain() {
            tokens.remove(&rsvp.qr_token);
        }
        Ok(())
    }

    async fn list_upcoming(&self, now: DateTime<Utc>, category: Option<&str>) -> CoreResult<Vec<Event>> {
        let mut upcoming = Vec::new();
        for partition in self.snapshot().await {
            let partition = partition.lock().await;
            let event = &partition.event;
            if partition.removed || event.starts_at < now {
                continue;
            }
            if category.map_or(true, |c| event.category == c) {
                upcoming.push(event.clone());
            }
        }
        upcoming.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then_with(|| a.id.cmp(&b.id)));
        Ok(upcoming)
    }

    async fn list_by_organizer(&self, organizer: UserId) -> CoreResult<Vec<Event>> {
        let mut owned = Vec::new();
        for partition in self.snapshot().await {
            let partition = partition.lock().await;
            if !partition.removed && partition.event.organizer_id == organizer {
                owned.push(partition.event.clone());
            }
        }
        owned.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then_with(|| a.id.cmp(&b.id)));
        Ok(owned)
    }
}

#[async_trait]
impl RsvpLedger for MemoryStore {
    async fn create(&self, event_id: EventId, user_id: UserId, reminder: ReminderSettings) -> CoreResult<Rsvp> {
        let partition = self.partition(event_id).await?;
        let mut partition = partition.lock().await;
        live(&partition)?;

        if partition.rsvps.contains_key(&user_id) {
            return Err(CoreError::AlreadyExists(format!(
                "user {} already has an RSVP for event {}",
                user_id, event_id
            )));
        }
        if let Some(capacity) = partition.event.max_attendees {
            if partition.rsvps.len() as u64 >= u64::from(capacity) {
                return Err(CoreError::AtCapacity { capacity });
            }
        }

        let token = self.claim_token(event_id, user_id).await?;
        let rsvp = Rsvp::new(event_id, user_id, token, reminder, Utc::now());
        partition.rsvps.insert(user_id, rsvp.clone());
        debug!("Ledger now holds {} RSVPs for event {}", partition.rsvps.len(), event_id);
        Ok(rsvp)
    }

    async fn find_by_token(&self, token: &QrToken) -> CoreResult<Rsvp> {
        let (event_id, user_id) = self.token_owner(token).await?;
        let partition = self.partition(event_id).await?;
        let partition = partition.lock().await;
        live(&partition)?;
        partition
            .rsvps
            .get(&user_id)
            .filter(|r| &r.qr_token == token)
            .cloned()
            .ok_or_else(token_not_found)
    }

    async fn find_by_event_and_user(&self, event_id: EventId, user_id: UserId) -> CoreResult<Rsvp> {
        let partition = self.partition(event_id).await?;
        let partition = partition.lock().await;
        live(&partition)?;
        partition
            .rsvps
            .get(&user_id)
            .cloned()
            .ok_or_else(|| rsvp_not_found(event_id, user_id))
    }

    async fn count_active(&self, event_id: EventId) -> CoreResult<u64> {
        let partition = self.partition(event_id).await?;
        let partition = partition.lock().await;
        live(&partition)?;
        Ok(partition.rsvps.len() as u64)
    }

    async fn count_checked_in(&self, event_id: EventId) -> CoreResult<u64> {
        let partition = self.partition(event_id).await?;
        let partition = partition.lock().await;
        live(&partition)?;
        Ok(partition.rsvps.values().filter(|r| r.checked_in).count() as u64)
    }

    async fn check_in(&self, token: &QrToken) -> CoreResult<Rsvp> {
        let (event_id, user_id) = self.token_owner(token).await?;

        let partition = self.partition(event_id).await?;
        let mut partition = partition.lock().await;
        live(&partition)?;
        let rsvp = partition
            .rsvps
            .get_mut(&user_id)
            .filter(|r| &r.qr_token == token)
            .ok_or_else(token_not_found)?;

        if !rsvp.mark_checked_in(Utc::now()) {
            return Err(CoreError::AlreadyCheckedIn);
        }
        Ok(rsvp.clone())
    }

    async fn cancel(&self, event_id: EventId, user_id: UserId) -> CoreResult<Rsvp> {
        let partition = self.partition(event_id).await?;
        let mut partition = partition.lock().await;
        live(&partition)?;

        let checked_in = partition
            .rsvps
            .get(&user_id)
            .map(|r| r.checked_in)
            .ok_or_else(|| rsvp_not_found(event_id, user_id))?;
        if checked_in {
            return Err(CoreError::InvalidState("cannot cancel an RSVP after check-in".to_string()));
        }

        // record and index go together, with no await in between
        let mut tokens = self.tokens.lock().await;
        let removed = partition
            .rsvps
            .remove(&user_id)
            .ok_or_else(|| rsvp_not_found(event_id, user_id))?;
        tokens.remove(&removed.qr_token);
        Ok(removed)
    }

    async fn list_for_user(&self, user_id: UserId) -> CoreResult<Vec<Rsvp>> {
        let mut mine = Vec::new();
        for partition in self.snapshot().await {
            let partition = partition.lock().await;
            if partition.removed {
                continue;
            }
            if let Some(rsvp) = partition.rsvps.get(&user_id) {
                mine.push(rsvp.clone());
            }
        }
        mine.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(mine)
    }

    async fn list_for_event(&self, event_id: EventId) -> CoreResult<Vec<Rsvp>> {
        let partition = self.partition(event_id).await?;
        let partition = partition.lock().await;
        live(&partition)?;
        let mut attendees: Vec<Rsvp> = partition.rsvps.values().cloned().collect();
        attendees.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(attendees)
    }

    async fn update_reminder(
        &self,
        event_id: EventId,
        user_id: UserId,
        reminder: ReminderSettings,
    ) -> CoreResult<Rsvp> {
        let partition = self.partition(event_id).await?;
        let mut partition = partition.lock().await;
        live(&partition)?;
        let rsvp = partition
            .rsvps
            .get_mut(&user_id)
            .ok_or_else(|| rsvp_not_found(event_id, user_id))?;
        rsvp.reminder = reminder;
        Ok(rsvp.clone())
    }
}
