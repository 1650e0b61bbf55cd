use redis::AsyncCommands;
use tracing::info;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        info!("Redis client configured for rate limiting");
        Ok(Self { client })
    }

    /// Fixed-window counter. Returns `true` while `key` is within `limit`
    /// hits for the current `window_seconds`. The window starts with the
    /// first hit and is never extended by later ones.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> redis::RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count, ttl): (i64, i64) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .ttl(key)
            .query_async(&mut conn)
            .await?;

        if needs_expiry(ttl) {
            conn.expire::<_, ()>(key, window_seconds).await?;
        }

        Ok(admits(count, limit))
    }
}

/// `TTL` answers -1 for a key with no expiry, which after `INCR` means this
/// hit opened the window (or an earlier opener died before setting it).
fn needs_expiry(ttl: i64) -> bool {
    ttl < 0
}

fn admits(count: i64, limit: i64) -> bool {
    count <= limit
}

pub fn rate_limit_key(subject: &str) -> String {
    format!("gather:ratelimit:{}", subject)
}
