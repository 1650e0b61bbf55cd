use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    /// Deadline for every individual storage call.
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
    /// Radius used by discovery when the caller does not send one.
    #[serde(default = "default_radius_km")]
    pub default_radius_km: f64,
    /// How many fresh QR tokens to try before giving up on a collision streak.
    #[serde(default = "default_token_attempts")]
    pub token_attempts: usize,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
    #[serde(default = "default_activity_buffer")]
    pub activity_buffer: usize,
}

fn default_storage_timeout_ms() -> u64 { 2_000 }
fn default_radius_km() -> f64 { 50.0 }
fn default_token_attempts() -> usize { 8 }
fn default_rate_limit() -> i64 { 120 }
fn default_activity_buffer() -> usize { 256 }

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            storage_timeout_ms: default_storage_timeout_ms(),
            default_radius_km: default_radius_km(),
            token_attempts: default_token_attempts(),
            rate_limit_per_minute: default_rate_limit(),
            activity_buffer: default_activity_buffer(),
        }
    }
}

impl BusinessRules {
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// No `url` means the service keeps everything in memory.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// No `url` disables rate limiting.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisConfig {
    pub url: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. GATHER__DATABASE__URL=postgres://...
            .add_source(config::Environment::with_prefix("GATHER").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
