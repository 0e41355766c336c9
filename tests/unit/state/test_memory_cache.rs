// Typed helpers and the invalidation protocol over the in-process cache

use business_hub::core::errors::CacheError;
use business_hub::state::cache::{get_entity, get_json, invalidate_entity, set_json};
use business_hub::state::{build_key, CacheStore, CacheValue, EntityKind, KeyPrefix, MemoryCache};
use business_hub::core::models::Business;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

async fn put(cache: &MemoryCache, key: &str) {
    cache.set(key, CacheValue::Text("x".to_string()), TTL).await.unwrap();
}

#[tokio::test]
async fn test_invalidation_removes_entity_and_its_lists_only() {
    let cache = MemoryCache::default();
    put(&cache, "business:1").await;
    put(&cache, "business:2").await;
    put(&cache, "business-list:aaa").await;
    put(&cache, "business-list:bbb").await;
    put(&cache, "user-list:ccc").await;

    invalidate_entity(&cache, EntityKind::Business, "1").await.unwrap();

    assert_eq!(cache.get("business:1").await, Err(CacheError::Miss));
    assert_eq!(cache.get("business-list:aaa").await, Err(CacheError::Miss));
    assert_eq!(cache.get("business-list:bbb").await, Err(CacheError::Miss));
    assert!(cache.get("business:2").await.is_ok());
    assert!(cache.get("user-list:ccc").await.is_ok());
}

#[tokio::test]
async fn test_invalidation_of_uncached_entity_succeeds() {
    let cache = MemoryCache::default();
    assert!(invalidate_entity(&cache, EntityKind::Job, "missing").await.is_ok());
}

#[tokio::test]
async fn test_wrong_shape_is_decode_error_not_miss() {
    let cache = MemoryCache::default();
    let key = build_key(KeyPrefix::Entity(EntityKind::Business), ["1"]);
    put(&cache, &key).await;

    let result = get_entity::<Business>(&cache, &key).await;
    assert!(matches!(result, Err(CacheError::Decode(_))));
}

#[tokio::test]
async fn test_json_values() {
    let cache = MemoryCache::default();
    set_json(&cache, "business-list:k", &vec!["a", "b"], TTL).await.unwrap();

    let items: Vec<String> = get_json(&cache, "business-list:k").await.unwrap();
    assert_eq!(items, vec!["a".to_string(), "b".to_string()]);

    let wrong: Result<u64, _> = get_json(&cache, "business-list:k").await;
    assert!(matches!(wrong, Err(CacheError::Decode(_))));
}
