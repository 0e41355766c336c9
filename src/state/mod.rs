// Cache layer: key namespace, store abstraction and backends

pub mod cache;
pub mod glob;
pub mod keys;
pub mod memory_store;
pub mod redis_store;

pub use cache::{CacheFields, CacheStore, CacheValue};
pub use keys::{build_key, EntityKind, KeyPrefix};
pub use memory_store::MemoryCache;
pub use redis_store::RedisCache;
