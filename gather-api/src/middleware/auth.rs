use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use gather_core::{CoreError, CoreResult, Identity, IdentityResolver, Role};
use gather_shared::UserId;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub exp: usize,
}

/// Resolves HS256 bearer tokens into an [`Identity`]. Issuing tokens is
/// somebody else's job.
pub struct JwtIdentityResolver {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

fn parse_role(role: &str) -> CoreResult<Role> {
    match role {
        "ATTENDEE" => Ok(Role::Attendee),
        "ORGANIZER" => Ok(Role::Organizer),
        other => Err(CoreError::Unauthenticated(format!("unknown role {}", other))),
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, credential: &str) -> CoreResult<Identity> {
        let token_data = decode::<Claims>(credential, &self.key, &self.validation).map_err(|e| {
            debug!("Rejected bearer token: {}", e);
            CoreError::Unauthenticated("invalid or expired token".to_string())
        })?;
        let claims = token_data.claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .map(UserId)
            .map_err(|_| CoreError::Unauthenticated("subject is not a user id".to_string()))?;
        let role = parse_role(&claims.role)?;

        Ok(Identity::new(user_id, claims.email, role))
    }
}

// ============================================================================
// Authentication Middleware
// ============================================================================

/// Resolves the bearer credential and hands the [`Identity`] to handlers
/// through request extensions.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let credential = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_owned);

    let Some(credential) = credential else {
        return AppError::from(CoreError::Unauthenticated("missing bearer token".to_string())).into_response();
    };

    match state.identity.resolve(&credential).await {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => AppError::from(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn mint(secret: &str, sub: &str, role: &str, exp_offset: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            email: "someone@example.com".to_string(),
            role: role.to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn test_resolves_valid_token() {
        let resolver = JwtIdentityResolver::new("secret");
        let user = Uuid::new_v4();
        let identity = resolver
            .resolve(&mint("secret", &user.to_string(), "ORGANIZER", 3600))
            .await
            .unwrap();

        assert_eq!(identity.user_id, UserId(user));
        assert_eq!(identity.role, Role::Organizer);
        assert_eq!(identity.email.expose(), "someone@example.com");
    }

    #[tokio::test]
    async fn test_rejects_bad_tokens() {
        let resolver = JwtIdentityResolver::new("secret");
        let user = Uuid::new_v4().to_string();

        for token in [
            mint("other-secret", &user, "ATTENDEE", 3600),
            mint("secret", &user, "ATTENDEE", -3600),
            mint("secret", "not-a-uuid", "ATTENDEE", 3600),
            mint("secret", &user, "ADMIN", 3600),
            "garbage".to_string(),
        ] {
            assert!(matches!(
                resolver.resolve(&token).await,
                Err(CoreError::Unauthenticated(_))
            ));
        }
    }
}
