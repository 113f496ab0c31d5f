use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use uplan_core::{Error, Result, cache::CacheBackend};
use uuid::Uuid;

const DEFAULT_PREFIX: &str = "uplan";

/// Redis backend shared by every server instance.
///
/// Windows are sorted sets scored by milliseconds; each window operation
/// runs as one MULTI/EXEC pipeline. A reservation that overshoots the limit
/// is rolled back with a ZREM, so racing callers may briefly see one
/// another's rejected entries and be denied, but never over-admitted.
#[derive(Clone)]
pub struct RedisCache {
    connection: redis::aio::MultiplexedConnection,
    prefix: String,
}

impl RedisCache {
    pub async fn new(redis_url: &str, prefix: Option<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("Failed to create Redis client: {e}")))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Cache(format!("Failed to connect to Redis: {e}")))?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
        })
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

fn cache_error(action: &str) -> impl FnOnce(redis::RedisError) -> Error + '_ {
    move |e| Error::Cache(format!("Failed to {action}: {e}"))
}

/// Members must be unique so two requests in the same millisecond both count.
fn window_member(score: i64) -> String {
    format!("{score}-{}", Uuid::new_v4())
}

/// Redis expiries are whole seconds and must be positive.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn set_raw(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(self.build_key(key), value, ttl_secs(ttl))
            .await
            .map_err(cache_error("set Redis key"))
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        conn.get(self.build_key(key))
            .await
            .map_err(cache_error("get Redis key"))
    }

    async fn window_prune_count(&self, key: &str, floor: i64) -> Result<u64> {
        let full_key = self.build_key(key);
        let mut conn = self.connection.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .zrembyscore(&full_key, "-inf", format!("({floor}"))
            .ignore()
            .zcard(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(cache_error("count rate window"))?;

        Ok(count)
    }

    async fn window_reserve(
        &self,
        key: &str,
        floor: i64,
        limit: u64,
        score: i64,
        ttl: Duration,
    ) -> Result<bool> {
        let full_key = self.build_key(key);
        let member = window_member(score);
        let mut conn = self.connection.clone();
        let expiry = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);

        // add first, then count: MULTI/EXEC serializes racing callers, so
        // only those that saw at most `limit` entries keep theirs
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .zrembyscore(&full_key, "-inf", format!("({floor}"))
            .ignore()
            .zadd(&full_key, &member, score)
            .ignore()
            .expire(&full_key, expiry)
            .ignore()
            .zcard(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(cache_error("reserve rate window entry"))?;

        if count > limit {
            conn.zrem::<_, _, ()>(&full_key, &member)
                .await
                .map_err(cache_error("release rate window entry"))?;
            return Ok(false);
        }
        Ok(true)
    }
}
