pub mod memory;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::Result;

pub use memory::MemoryCache;

/// Key-value store backing the fetch cache and the rate limiter.
///
/// Every method must be atomic per key: concurrent callers from several
/// service instances share one backend.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Stores `value` under `key` for `ttl`.
    async fn set_raw(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// The live value under `key`, if any.
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Removes window entries scored below `floor` and returns how many remain.
    async fn window_prune_count(&self, key: &str, floor: i64) -> Result<u64>;

    /// Prunes below `floor`, then adds an entry scored `score` only while
    /// fewer than `limit` remain. Returns whether the entry was added; an
    /// added entry extends the key's expiry to `ttl`. Callers racing on one
    /// key never get more than `limit` entries granted.
    async fn window_reserve(
        &self,
        key: &str,
        floor: i64,
        limit: u64,
        score: i64,
        ttl: Duration,
    ) -> Result<bool>;
}

/// Shared handle passed to the components that need a backend.
pub type SharedBackend = Arc<dyn CacheBackend>;
