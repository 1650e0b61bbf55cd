//! Postgres-backed [`EventStore`] and [`RsvpLedger`].
//!
//! Capacity is enforced inside one transaction that holds the event row
//! lock (`FOR UPDATE`) across count and insert, so RSVPs for the same event
//! queue behind each other while other events proceed. Uniqueness of
//! `(event_id, user_id)` and `qr_token` is also backed by table constraints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gather_core::repository::{EventStore, RsvpLedger};
use gather_core::token::{RandomTokenGenerator, TokenGenerator};
use gather_core::{CoreError, CoreResult};
use gather_shared::{
    Event, EventDraft, EventId, GeoPoint, QrToken, ReminderSettings, Rsvp, RsvpId, UserId,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::storage_error;

const EVENT_COLUMNS: &str = "id, organizer_id, title, description, category, latitude, longitude, \
     venue_name, address, image_url, starts_at, ends_at, max_attendees, is_free, price_cents, \
     created_at, updated_at";

const RSVP_COLUMNS: &str = "id, event_id, user_id, qr_token, checked_in, checked_in_at, \
     reminder_enabled, reminder_minutes_before, created_at";

pub struct PgStore {
    pool: PgPool,
    token_gen: Arc<dyn TokenGenerator>,
    token_attempts: usize,
}

impl PgStore {
    pub fn new(pool: PgPool, token_attempts: usize) -> Self {
        Self {
            pool,
            token_gen: Arc::new(RandomTokenGenerator::default()),
            token_attempts: token_attempts.max(1),
        }
    }

    async fn owner_of(&self, id: EventId) -> CoreResult<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>("SELECT organizer_id FROM events WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)
    }

    /// Explains why a guarded `UPDATE`/`DELETE` on an event touched no row.
    async fn ownership_failure(&self, actor: UserId, id: EventId) -> CoreError {
        match self.owner_of(id).await {
            Ok(Some(owner)) if owner != actor.as_uuid() => {
                CoreError::PermissionDenied(format!("event {} belongs to another organizer", id))
            }
            Ok(_) => CoreError::NotFound(format!("event {}", id)),
            Err(e) => e,
        }
    }

    async fn rsvp_by_token(&self, token: &QrToken) -> CoreResult<Option<RsvpRow>> {
        sqlx::query_as::<_, RsvpRow>(&format!("SELECT {} FROM rsvps WHERE qr_token = $1", RSVP_COLUMNS))
            .bind(token.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    organizer_id: Uuid,
    title: String,
    description: Option<String>,
    category: String,
    latitude: f64,
    longitude: f64,
    venue_name: Option<String>,
    address: Option<String>,
    image_url: Option<String>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    max_attendees: Option<i32>,
    is_free: bool,
    price_cents: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            id: EventId(row.id),
            organizer_id: UserId(row.organizer_id),
            title: row.title,
            description: row.description,
            category: row.category,
            location: GeoPoint::new(row.latitude, row.longitude),
            venue_name: row.venue_name,
            address: row.address,
            image_url: row.image_url,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            max_attendees: row.max_attendees.and_then(|m| u32::try_from(m).ok()),
            is_free: row.is_free,
            price_cents: row.price_cents,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RsvpRow {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    qr_token: String,
    checked_in: bool,
    checked_in_at: Option<DateTime<Utc>>,
    reminder_enabled: bool,
    reminder_minutes_before: i32,
    created_at: DateTime<Utc>,
}

impl From<RsvpRow> for Rsvp {
    fn from(row: RsvpRow) -> Self {
        Self {
            id: RsvpId(row.id),
            event_id: EventId(row.event_id),
            user_id: UserId(row.user_id),
            qr_token: QrToken::new(row.qr_token),
            checked_in: row.checked_in,
            checked_in_at: row.checked_in_at,
            reminder: ReminderSettings {
                enabled: row.reminder_enabled,
                minutes_before: u32::try_from(row.reminder_minutes_before).unwrap_or(0),
            },
            created_at: row.created_at,
        }
    }
}

fn to_db_int(field: &str, value: u32) -> CoreResult<i32> {
    i32::try_from(value).map_err(|_| CoreError::InvalidArgument(format!("{} is too large", field)))
}

fn rsvp_not_found(event_id: EventId, user_id: UserId) -> CoreError {
    CoreError::NotFound(format!("rsvp for user {} on event {}", user_id, event_id))
}

#[async_trait]
impl EventStore for PgStore {
    async fn insert_event(&self, event: Event) -> CoreResult<Event> {
        let max_attendees = event
            .max_attendees
            .map(|m| to_db_int("max_attendees", m))
            .transpose()?;

        let row = sqlx::query_as::<_, EventRow>(&format!(
            "INSERT INTO events ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING {}",
            EVENT_COLUMNS, EVENT_COLUMNS
        ))
        .bind(event.id.as_uuid())
        .bind(event.organizer_id.as_uuid())
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.category)
        .bind(event.location.latitude)
        .bind(event.location.longitude)
        .bind(&event.venue_name)
        .bind(&event.address)
        .bind(&event.image_url)
        .bind(event.starts_at)
        .bind(event.ends_at)
        .bind(max_attendees)
        .bind(event.is_free)
        .bind(event.price_cents)
        .bind(event.created_at)
        .bind(event.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.into())
    }

    async fn get_event(&self, id: EventId) -> CoreResult<Event> {
        sqlx::query_as::<_, EventRow>(&format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?
            .map(Event::from)
            .ok_or_else(|| CoreError::NotFound(format!("event {}", id)))
    }

    async fn update_event(
        &self,
        actor: UserId,
        id: EventId,
        draft: EventDraft,
        now: DateTime<Utc>,
    ) -> CoreResult<Event> {
        let max_attendees = draft
            .max_attendees
            .map(|m| to_db_int("max_attendees", m))
            .transpose()?;

        let updated = sqlx::query_as::<_, EventRow>(&format!(
            "UPDATE events SET title = $3, description = $4, category = $5, latitude = $6, \
             longitude = $7, venue_name = $8, address = $9, image_url = $10, starts_at = $11, \
             ends_at = $12, max_attendees = $13, is_free = $14, price_cents = $15, updated_at = $16 \
             WHERE id = $1 AND organizer_id = $2 \
             RETURNING {}",
            EVENT_COLUMNS
        ))
        .bind(id.as_uuid())
        .bind(actor.as_uuid())
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.category)
        .bind(draft.location.latitude)
        .bind(draft.location.longitude)
        .bind(&draft.venue_name)
        .bind(&draft.address)
        .bind(&draft.image_url)
        .bind(draft.starts_at)
        .bind(draft.ends_at)
        .bind(max_attendees)
        .bind(draft.is_free)
        .bind(draft.price_cents)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match updated {
            Some(row) => Ok(row.into()),
            None => Err(self.ownership_failure(actor, id).await),
        }
    }

    async fn delete_event(&self, actor: UserId, id: EventId) -> CoreResult<()> {
        // rsvps go with it through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM events WHERE id = $1 AND organizer_id = $2")
            .bind(id.as_uuid())
            .bind(actor.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(self.ownership_failure(actor, id).await);
        }
        Ok(())
    }

    async fn list_upcoming(&self, now: DateTime<Utc>, category: Option<&str>) -> CoreResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events \
             WHERE starts_at >= $1 AND ($2::TEXT IS NULL OR category = $2) \
             ORDER BY starts_at ASC, id ASC",
            EVENT_COLUMNS
        ))
        .bind(now)
        .bind(category)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn list_by_organizer(&self, organizer: UserId) -> CoreResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE organizer_id = $1 ORDER BY starts_at ASC, id ASC",
            EVENT_COLUMNS
        ))
        .bind(organizer.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.into_iter().map(Event::from).collect())
    }
}

#[async_trait]
impl RsvpLedger for PgStore {
    async fn create(&self, event_id: EventId, user_id: UserId, reminder: ReminderSettings) -> CoreResult<Rsvp> {
        let minutes_before = to_db_int("minutes_before", reminder.minutes_before)?;
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        // serializes every RSVP for this event until commit
        let max_attendees: Option<i32> =
            sqlx::query_scalar::<_, Option<i32>>("SELECT max_attendees FROM events WHERE id = $1 FOR UPDATE")
                .bind(event_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_error)?
                .ok_or_else(|| CoreError::NotFound(format!("event {}", event_id)))?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM rsvps WHERE event_id = $1 AND user_id = $2)")
                .bind(event_id.as_uuid())
                .bind(user_id.as_uuid())
                .fetch_one(&mut *tx)
                .await
                .map_err(storage_error)?;
        if exists {
            return Err(CoreError::AlreadyExists(format!(
                "user {} already has an RSVP for event {}",
                user_id, event_id
            )));
        }

        if let Some(max) = max_attendees {
            let active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rsvps WHERE event_id = $1")
                .bind(event_id.as_uuid())
                .fetch_one(&mut *tx)
                .await
                .map_err(storage_error)?;
            if active >= i64::from(max) {
                return Err(CoreError::AtCapacity {
                    capacity: u32::try_from(max).unwrap_or(0),
                });
            }
        }

        let insert = format!(
            "INSERT INTO rsvps (id, event_id, user_id, qr_token, reminder_enabled, reminder_minutes_before, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (qr_token) DO NOTHING \
             RETURNING {}",
            RSVP_COLUMNS
        );
        for attempt in 1..=self.token_attempts {
            let token = self.token_gen.generate();
            let row = sqlx::query_as::<_, RsvpRow>(&insert)
                .bind(RsvpId::new().as_uuid())
                .bind(event_id.as_uuid())
                .bind(user_id.as_uuid())
                .bind(token.as_str())
                .bind(reminder.enabled)
                .bind(minutes_before)
                .bind(Utc::now())
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_error)?;

            if let Some(row) = row {
                tx.commit().await.map_err(storage_error)?;
                return Ok(row.into());
            }
            warn!("QR token collision on attempt {} for event {}", attempt, event_id);
        }

        // dropping tx rolls back
        Err(CoreError::Unavailable(format!(
            "no unique QR token after {} attempts",
            self.token_attempts
        )))
    }

    async fn find_by_token(&self, token: &QrToken) -> CoreResult<Rsvp> {
        self.rsvp_by_token(token)
            .await?
            .map(Rsvp::from)
            .ok_or_else(|| CoreError::NotFound("rsvp for token".to_string()))
    }

    async fn find_by_event_and_user(&self, event_id: EventId, user_id: UserId) -> CoreResult<Rsvp> {
        sqlx::query_as::<_, RsvpRow>(&format!(
            "SELECT {} FROM rsvps WHERE event_id = $1 AND user_id = $2",
            RSVP_COLUMNS
        ))
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .map(Rsvp::from)
        .ok_or_else(|| rsvp_not_found(event_id, user_id))
    }

    async fn count_active(&self, event_id: EventId) -> CoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rsvps WHERE event_id = $1")
            .bind(event_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(count.max(0) as u64)
    }

    async fn count_checked_in(&self, event_id: EventId) -> CoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rsvps WHERE event_id = $1 AND checked_in")
            .bind(event_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(count.max(0) as u64)
    }

    async fn check_in(&self, token: &QrToken) -> CoreResult<Rsvp> {
        let updated = sqlx::query_as::<_, RsvpRow>(&format!(
            "UPDATE rsvps SET checked_in = TRUE, checked_in_at = $2 \
             WHERE qr_token = $1 AND NOT checked_in \
             RETURNING {}",
            RSVP_COLUMNS
        ))
        .bind(token.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        if let Some(row) = updated {
            info!("RSVP {} checked in", row.id);
            return Ok(row.into());
        }
        match self.rsvp_by_token(token).await? {
            Some(_) => Err(CoreError::AlreadyCheckedIn),
            None => Err(CoreError::NotFound("rsvp for token".to_string())),
        }
    }

    async fn cancel(&self, event_id: EventId, user_id: UserId) -> CoreResult<Rsvp> {
        let removed = sqlx::query_as::<_, RsvpRow>(&format!(
            "DELETE FROM rsvps WHERE event_id = $1 AND user_id = $2 AND NOT checked_in RETURNING {}",
            RSVP_COLUMNS
        ))
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        if let Some(row) = removed {
            return Ok(row.into());
        }
        match self.find_by_event_and_user(event_id, user_id).await {
            Ok(_) => Err(CoreError::InvalidState("cannot cancel an RSVP after check-in".to_string())),
            Err(e) => Err(e),
        }
    }

    async fn list_for_user(&self, user_id: UserId) -> CoreResult<Vec<Rsvp>> {
        let rows = sqlx::query_as::<_, RsvpRow>(&format!(
            "SELECT {} FROM rsvps WHERE user_id = $1 ORDER BY created_at ASC, id ASC",
            RSVP_COLUMNS
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.into_iter().map(Rsvp::from).collect())
    }

    async fn list_for_event(&self, event_id: EventId) -> CoreResult<Vec<Rsvp>> {
        let rows = sqlx::query_as::<_, RsvpRow>(&format!(
            "SELECT {} FROM rsvps WHERE event_id = $1 ORDER BY created_at ASC, id ASC",
            RSVP_COLUMNS
        ))
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.into_iter().map(Rsvp::from).collect())
    }

    async fn update_reminder(
        &self,
        event_id: EventId,
        user_id: UserId,
        reminder: ReminderSettings,
    ) -> CoreResult<Rsvp> {
        let minutes_before = to_db_int("minutes_before", reminder.minutes_before)?;
        sqlx::query_as::<_, RsvpRow>(&format!(
            "UPDATE rsvps SET reminder_enabled = $3, reminder_minutes_before = $4 \
             WHERE event_id = $1 AND user_id = $2 \
             RETURNING {}",
            RSVP_COLUMNS
        ))
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(reminder.enabled)
        .bind(minutes_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .map(Rsvp::from)
        .ok_or_else(|| rsvp_not_found(event_id, user_id))
    }
}
