use gather_core::CoreError;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{error, info};

pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

/// Storage failures surface as `Timeout` when the pool could not hand out a
/// connection in time and `Unavailable` otherwise. Details stay in the log.
pub fn storage_error(e: sqlx::Error) -> CoreError {
    match e {
        sqlx::Error::PoolTimedOut => {
            error!("Database pool timed out after {:?}", ACQUIRE_TIMEOUT);
            CoreError::Timeout(ACQUIRE_TIMEOUT)
        }
        other => {
            error!("Database error: {}", other);
            CoreError::Unavailable("database error".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_mapping() {
        assert!(matches!(
            storage_error(sqlx::Error::PoolTimedOut),
            CoreError::Timeout(d) if d == ACQUIRE_TIMEOUT
        ));
        assert!(matches!(
            storage_error(sqlx::Error::PoolClosed),
            CoreError::Unavailable(_)
        ));
    }
}
