use async_trait::async_trait;
use gather_shared::pii::Masked;
use gather_shared::UserId;
use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Attendee,
    Organizer,
}

/// The caller, as vouched for by whatever authenticated the request.
/// The core never sees credentials.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: UserId,
    pub email: Masked<String>,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: UserId, email: impl Into<String>, role: Role) -> Self {
        Self {
            user_id,
            email: Masked(email.into()),
            role,
        }
    }

    pub fn require_role(&self, role: Role) -> CoreResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied(format!("requires the {:?} role", role)))
        }
    }
}

/// Turns a caller credential into an [`Identity`], or fails `Unauthenticated`.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> CoreResult<Identity>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_role() {
        let organizer = Identity::new(UserId::new(), "host@example.com", Role::Organizer);
        let attendee = Identity::new(UserId::new(), "guest@example.com", Role::Attendee);

        assert!(organizer.require_role(Role::Organizer).is_ok());
        assert!(matches!(
            attendee.require_role(Role::Organizer),
            Err(CoreError::PermissionDenied(_))
        ));
        assert!(!format!("{:?}", attendee).contains("guest@example.com"));
    }
}
