use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    middleware,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use gather_core::geo::NearbyQuery;
use gather_core::{EventView, Identity, NearbyEventView};
use gather_shared::{EventDraft, EventId};
use serde::Deserialize;
use tracing::debug;

use crate::error::AppError;
use crate::middleware::auth_middleware;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct NearbyParams {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
    pub category: Option<String>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub category: Option<String>,
}

// ============================================================================
// Routes
// ============================================================================

pub fn routes(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/events/nearby", get(find_nearby))
        .route("/v1/events", get(list_upcoming))
        .route("/v1/events/{id}", get(get_event));

    let organizer = Router::new()
        .route("/v1/events", axum::routing::post(create_event))
        .route("/v1/events/mine", get(list_mine))
        .route("/v1/events/{id}", axum::routing::put(update_event).delete(delete_event))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    public.merge(organizer)
}

// ============================================================================
// Discovery
// ============================================================================

async fn find_nearby(
    State(state): State<AppState>,
    params: Result<Query<NearbyParams>, QueryRejection>,
) -> Result<Json<Vec<NearbyEventView>>, AppError> {
    let Query(params) = params.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let radius_km = params.radius_km.unwrap_or(state.business_rules.default_radius_km);
    debug!("Nearby search around ({}, {}) r={}km", params.lat, params.lng, radius_km);

    let query = NearbyQuery::new(params.lat, params.lng, radius_km)
        .with_category(params.category)
        .until(params.until);
    let events = state.events.find_nearby(&query).await?;
    Ok(Json(events))
}

async fn list_upcoming(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<EventView>>, AppError> {
    let events = state.events.list_upcoming(params.category.as_deref()).await?;
    Ok(Json(events))
}

async fn get_event(State(state): State<AppState>, Path(id): Path<EventId>) -> Result<Json<EventView>, AppError> {
    Ok(Json(state.events.get_event(id).await?))
}

// ============================================================================
// Organizer Management
// ============================================================================

async fn create_event(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(draft): Json<EventDraft>,
) -> Result<(StatusCode, Json<EventView>), AppError> {
    let created = state.events.create_event(&identity, draft).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_event(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<EventId>,
    Json(draft): Json<EventDraft>,
) -> Result<Json<EventView>, AppError> {
    Ok(Json(state.events.update_event(&identity, id, draft).await?))
}

async fn delete_event(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<EventId>,
) -> Result<StatusCode, AppError> {
    state.events.delete_event(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_mine(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<EventView>>, AppError> {
    Ok(Json(state.events.list_mine(&identity).await?))
}
