use anyhow::Context;
use gather_api::{app, middleware::JwtIdentityResolver, AppState};
use gather_core::{EventService, EventStore, MemoryStore, RsvpLedger, RsvpService};
use gather_store::app_config::Config;
use gather_store::{DbClient, PgStore, RedisClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gather_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Gather API on port {}", config.server.port);

    let (events, ledger): (Arc<dyn EventStore>, Arc<dyn RsvpLedger>) = match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            let store = Arc::new(PgStore::new(db.pool.clone(), config.rules.token_attempts));
            tracing::info!("Using Postgres store");
            let events: Arc<dyn EventStore> = store.clone();
            (events, store as Arc<dyn RsvpLedger>)
        }
        None => {
            tracing::warn!("No database.url configured; RSVPs live in memory only");
            let store = Arc::new(MemoryStore::with_token_generator(
                Arc::new(gather_core::token::RandomTokenGenerator::default()),
                config.rules.token_attempts,
            ));
            let events: Arc<dyn EventStore> = store.clone();
            (events, store as Arc<dyn RsvpLedger>)
        }
    };

    let redis = match &config.redis.url {
        Some(url) => Some(Arc::new(
            RedisClient::new(url).await.context("Failed to configure Redis")?,
        )),
        None => None,
    };

    // RSVP activity fan-out for the organizer SSE feed
    let (activity_tx, _) = tokio::sync::broadcast::channel(config.rules.activity_buffer.max(1));

    let storage_timeout = config.rules.storage_timeout();
    let app_state = AppState {
        events: Arc::new(EventService::new(events.clone(), ledger.clone(), storage_timeout)),
        rsvps: Arc::new(RsvpService::new(events, ledger, activity_tx, storage_timeout)),
        identity: Arc::new(JwtIdentityResolver::new(&config.auth.jwt_secret)),
        redis,
        business_rules: config.rules.clone(),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
