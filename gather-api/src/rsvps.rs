use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, patch, post},
    Extension, Json, Router,
};
use futures_util::{Stream, StreamExt};
use gather_core::{EventStats, Identity, RsvpView};
use gather_shared::{EventId, QrToken, ReminderSettings};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::middleware::auth_middleware;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

/// Body of `POST /v1/events/{id}/rsvp`; an empty body takes the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct RsvpRequest {
    pub reminder: Option<ReminderSettings>,
}

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub qr_token: String,
}

// ============================================================================
// Routes
// ============================================================================

pub fn routes(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/events/{id}/stats", get(event_stats));

    let attendee = Router::new()
        .route(
            "/v1/events/{id}/rsvp",
            post(create_rsvp).get(my_rsvp).delete(cancel_rsvp),
        )
        .route("/v1/events/{id}/rsvp/reminder", patch(update_reminder))
        .route("/v1/events/{id}/attendees", get(list_attendees))
        .route("/v1/events/{id}/activity", get(activity_stream))
        .route("/v1/check-in", post(check_in))
        .route("/v1/rsvps", get(list_my_rsvps))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    public.merge(attendee)
}

// ============================================================================
// Attendee Flow
// ============================================================================

async fn create_rsvp(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(event_id): Path<EventId>,
    body: Bytes,
) -> Result<(StatusCode, Json<RsvpView>), AppError> {
    let request = if body.is_empty() {
        RsvpRequest::default()
    } else {
        serde_json::from_slice::<RsvpRequest>(&body).map_err(|e| AppError::BadRequest(e.to_string()))?
    };

    let view = state.rsvps.rsvp(event_id, &identity, request.reminder).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn my_rsvp(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(event_id): Path<EventId>,
) -> Result<Json<RsvpView>, AppError> {
    Ok(Json(state.rsvps.my_rsvp(event_id, &identity).await?))
}

async fn update_reminder(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(event_id): Path<EventId>,
    Json(reminder): Json<ReminderSettings>,
) -> Result<Json<RsvpView>, AppError> {
    Ok(Json(state.rsvps.update_reminder(event_id, &identity, reminder).await?))
}

async fn cancel_rsvp(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(event_id): Path<EventId>,
) -> Result<StatusCode, AppError> {
    state.rsvps.cancel(event_id, &identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_my_rsvps(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<RsvpView>>, AppError> {
    Ok(Json(state.rsvps.list_for_user(&identity).await?))
}

// ============================================================================
// Door & Organizer Views
// ============================================================================

async fn check_in(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CheckInRequest>,
) -> Result<Json<RsvpView>, AppError> {
    let token = QrToken::new(req.qr_token);
    Ok(Json(state.rsvps.check_in(&token, &identity).await?))
}

async fn list_attendees(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(event_id): Path<EventId>,
) -> Result<Json<Vec<RsvpView>>, AppError> {
    Ok(Json(state.rsvps.list_for_event(event_id, &identity).await?))
}

async fn event_stats(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
) -> Result<Json<EventStats>, AppError> {
    Ok(Json(state.rsvps.stats(event_id).await?))
}

/// Live reserve / cancel / check-in feed for one event's organizer.
async fn activity_stream(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(event_id): Path<EventId>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>, AppError> {
    let rx = state.rsvps.subscribe(event_id, &identity).await?;
    debug!("Organizer {} subscribed to activity of event {}", identity.user_id, event_id);

    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(activity) if activity.event_id == event_id => {
                Some(SseEvent::default().event("rsvp_activity").json_data(&activity))
            }
            Ok(_) => None,
            Err(e) => {
                // lagged subscribers skip what they missed
                warn!("Activity stream for event {} dropped messages: {}", event_id, e);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
