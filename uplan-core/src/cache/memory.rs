use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::{Error, Result, cache::CacheBackend};

#[derive(Debug)]
enum Slot {
    Bytes(Vec<u8>),
    Window(Vec<i64>),
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process backend for a single instance (CLI runs, tests).
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Cache("memory cache lock poisoned".to_string()))
    }
}

fn live(entries: &HashMap<String, Entry>, key: &str) -> bool {
    entries
        .get(key)
        .is_some_and(|entry| entry.is_live(Instant::now()))
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn set_raw(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Bytes(value.to_vec()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.lock()?;
        if !live(&entries, key) {
            entries.remove(key);
            return Ok(None);
        }
        match entries.get(key).map(|entry| &entry.slot) {
            Some(Slot::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(Slot::Window(_)) => Err(Error::Cache(format!("key {key} does not hold a value"))),
            None => Ok(None),
        }
    }

    async fn window_prune_count(&self, key: &str, floor: i64) -> Result<u64> {
        let mut entries = self.lock()?;
        if !live(&entries, key) {
            entries.remove(key);
            return Ok(0);
        }
        match entries.get_mut(key).map(|entry| &mut entry.slot) {
            Some(Slot::Window(scores)) => {
                scores.retain(|score| *score >= floor);
                Ok(scores.len() as u64)
            }
            Some(Slot::Bytes(_)) => Err(Error::Cache(format!("key {key} does not hold a window"))),
            None => Ok(0),
        }
    }

    async fn window_reserve(
        &self,
        key: &str,
        floor: i64,
        limit: u64,
        score: i64,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if !entry.is_live(now) {
                    entry.slot = Slot::Window(Vec::new());
                }
            })
            .or_insert_with(|| Entry {
                slot: Slot::Window(Vec::new()),
                expires_at: now,
            });
        let Slot::Window(scores) = &mut entry.slot else {
            return Err(Error::Cache(format!("key {key} does not hold a window")));
        };

        scores.retain(|s| *s >= floor);
        if scores.len() as u64 >= limit {
            return Ok(false);
        }
        scores.push(score);
        entry.expires_at = now + ttl;
        Ok(true)
    }
}
