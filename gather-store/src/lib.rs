pub mod app_config;
pub mod database;
pub mod pg_store;
pub mod redis_repo;

pub use database::DbClient;
pub use pg_store::PgStore;
pub use redis_repo::RedisClient;
