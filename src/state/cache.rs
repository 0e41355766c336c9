// Cache abstraction: values, typed helpers and the invalidation protocol

use crate::core::errors::CacheError;
use crate::state::keys::{build_key, EntityKind, KeyPrefix};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Value stored under a cache key
///
/// Structured values are kept as field maps rather than serialized blobs so
/// individual fields stay inspectable in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Text(String),
    Fields(Vec<(String, String)>),
}

impl CacheValue {
    pub fn into_text(self) -> Result<String, CacheError> {
        match self {
            CacheValue::Text(s) => Ok(s),
            CacheValue::Fields(_) => Err(CacheError::Decode("expected a string value, found a field map".to_string())),
        }
    }

    pub fn into_fields(self) -> Result<Vec<(String, String)>, CacheError> {
        match self {
            CacheValue::Fields(f) => Ok(f),
            CacheValue::Text(_) => Err(CacheError::Decode("expected a field map, found a string value".to_string())),
        }
    }
}

/// Explicit struct <-> ordered field list conversion for cached types
pub trait CacheFields: Sized {
    fn to_fields(&self) -> Vec<(String, String)>;
    fn from_fields(fields: &[(String, String)]) -> Result<Self, CacheError>;
}

/// Key-value store used as a cache
///
/// A `ttl` of zero means no expiry. A key's TTL is only ever changed by `set`;
/// reads never extend it. An empty field map is indistinguishable from an
/// absent key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a value; `CacheError::Miss` when absent
    async fn get(&self, key: &str) -> Result<CacheValue, CacheError>;

    /// Replace the value and TTL of `key`
    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<(), CacheError>;

    /// Atomically read and remove `key`. Of two concurrent callers at most one
    /// observes the value.
    async fn get_and_delete(&self, key: &str) -> Result<CacheValue, CacheError>;

    /// Every key currently matching `pattern` (Redis glob syntax)
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn del(&self, key: &str) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Read a structured entity
pub async fn get_entity<T: CacheFields>(cache: &dyn CacheStore, key: &str) -> Result<T, CacheError> {
    let fields = cache.get(key).await?.into_fields()?;
    T::from_fields(&fields)
}

/// Store a structured entity as a field map
pub async fn set_entity<T: CacheFields>(
    cache: &dyn CacheStore,
    key: &str,
    entity: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    cache.set(key, CacheValue::Fields(entity.to_fields()), ttl).await
}

/// Read a JSON-encoded string value
pub async fn get_json<T: DeserializeOwned>(cache: &dyn CacheStore, key: &str) -> Result<T, CacheError> {
    let text = cache.get(key).await?.into_text()?;
    serde_json::from_str(&text).map_err(|e| CacheError::Decode(e.to_string()))
}

pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let text = serde_json::to_string(value).map_err(|e| CacheError::Decode(e.to_string()))?;
    cache.set(key, CacheValue::Text(text), ttl).await
}

/// Delete every key matching `pattern`; returns how many keys were targeted
pub async fn delete_matching(cache: &dyn CacheStore, pattern: &str) -> Result<usize, CacheError> {
    let keys = cache.scan(pattern).await?;
    for key in &keys {
        cache.del(key).await?;
    }
    Ok(keys.len())
}

/// Invalidation protocol for an entity mutation
///
/// Deletes the entity's direct key, then every key under the entity's
/// list-cache prefix. List keys are hashed from filter parameters and cannot be
/// addressed individually, so they are dropped wholesale.
pub async fn invalidate_entity(cache: &dyn CacheStore, kind: EntityKind, id: &str) -> Result<usize, CacheError> {
    let direct = build_key(KeyPrefix::Entity(kind), [id]);
    cache.del(&direct).await?;

    let removed = delete_matching(cache, &KeyPrefix::EntityList(kind).pattern()).await?;
    debug!(entity = kind.as_str(), id = %id, list_keys = removed, "Cache invalidated");
    Ok(removed + 1)
}
