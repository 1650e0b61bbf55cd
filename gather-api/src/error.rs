use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gather_core::CoreError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::NotFound(_) | CoreError::InvalidToken => StatusCode::NOT_FOUND,
        CoreError::AlreadyExists(_)
        | CoreError::AtCapacity { .. }
        | CoreError::AlreadyCheckedIn
        | CoreError::InvalidState(_) => StatusCode::CONFLICT,
        CoreError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        CoreError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Core(err) => {
                let status = status_for(&err);
                let message = match &err {
                    // details were logged where the failure happened
                    CoreError::Unavailable(_) => "Service temporarily unavailable".to_string(),
                    _ => err.to_string(),
                };
                if status.is_server_error() {
                    tracing::error!("Request failed: {}", err);
                }
                (status, message)
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
