use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use gather_store::redis_repo::rate_limit_key;
use serde_json::json;
use std::net::SocketAddr;
use tracing::warn;

use crate::state::AppState;

const WINDOW_SECONDS: i64 = 60;

/// Per-client fixed window in Redis. Redis trouble never blocks a request.
pub async fn rate_limit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(redis) = state.redis.as_ref() else {
        return next.run(req).await;
    };

    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let key = rate_limit_key(&client);
    let limit = state.business_rules.rate_limit_per_minute;

    match redis.check_rate_limit(&key, limit, WINDOW_SECONDS).await {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            warn!("Rate limit exceeded for {}", client);
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Rate limit exceeded" })),
            )
                .into_response()
        }
        Err(e) => {
            warn!("Rate limiter unavailable, letting request through: {}", e);
            next.run(req).await
        }
    }
}
