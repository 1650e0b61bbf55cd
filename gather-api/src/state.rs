use gather_core::{EventService, IdentityResolver, RsvpService};
use gather_store::app_config::BusinessRules;
use gather_store::RedisClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub events: Arc<EventService>,
    pub rsvps: Arc<RsvpService>,
    pub identity: Arc<dyn IdentityResolver>,
    /// Rate limiting is off when this is `None`.
    pub redis: Option<Arc<RedisClient>>,
    pub business_rules: BusinessRules,
}
