// In-process cache store (moka) for local development and tests

use crate::core::errors::CacheError;
use crate::state::cache::{CacheStore, CacheValue};
use crate::state::glob::glob_match;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Per-entry expiry: set on create and on update, never on read
struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// moka-backed cache store with the same semantics as the Redis store
pub struct MemoryCache {
    cache: Cache<String, Entry>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();

        Self { cache }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<CacheValue, CacheError> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_live(Instant::now()) => Ok(entry.value),
            _ => Err(CacheError::Miss),
        }
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<(), CacheError> {
        if matches!(value, CacheValue::Fields(ref fields) if fields.is_empty()) {
            self.cache.invalidate(key).await;
            return Ok(());
        }

        let ttl = if ttl.is_zero() { None } else { Some(ttl) };
        let entry = Entry {
            value,
            ttl,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn get_and_delete(&self, key: &str) -> Result<CacheValue, CacheError> {
        // remove() hands the value to exactly one caller
        match self.cache.remove(key).await {
            Some(entry) if entry.is_live(Instant::now()) => Ok(entry.value),
            _ => Err(CacheError::Miss),
        }
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_match(pattern, key.as_str()))
            .map(|(key, _)| key.to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
