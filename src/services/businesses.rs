// Business catalogue with read-through caching

use crate::core::errors::{AppError, CacheError};
use crate::core::models::{AuthenticatedIdentity, Business, BusinessFilter, BusinessUpdate, NewBusiness, Page};
use crate::metrics::Metrics;
use crate::state::cache::{get_entity, get_json, invalidate_entity, set_entity, set_json};
use crate::state::{build_key, CacheStore, EntityKind, KeyPrefix};
use crate::store::BusinessRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ENTITY_LABEL: &str = "business";

/// Cache lifetimes for business reads
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub entity: Duration,
    pub list: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            entity: Duration::from_secs(600),
            list: Duration::from_secs(120),
        }
    }
}

/// Reads go cache first and fall back to the store; every mutation is
/// followed by invalidation of the entity key and all cached listings.
///
/// The cache is never authoritative here. Cache failures are logged and the
/// store answers instead.
pub struct BusinessService {
    repo: Arc<dyn BusinessRepository>,
    cache: Arc<dyn CacheStore>,
    ttls: CacheTtls,
    metrics: Option<Arc<Metrics>>,
}

impl BusinessService {
    pub fn new(repo: Arc<dyn BusinessRepository>, cache: Arc<dyn CacheStore>, ttls: CacheTtls) -> Self {
        Self {
            repo,
            cache,
            ttls,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, hit: bool) {
        if let Some(metrics) = &self.metrics {
            let counter = if hit { &metrics.cache_hits } else { &metrics.cache_misses };
            counter.with_label_values(&[ENTITY_LABEL]).inc();
        }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Business, AppError> {
        let key = build_key(KeyPrefix::Entity(EntityKind::Business), [id.to_string()]);

        match get_entity::<Business>(self.cache.as_ref(), &key).await {
            Ok(business) => {
                self.record(true);
                return Ok(business);
            }
            Err(CacheError::Miss) => debug!(key = %key, "Cache miss"),
            Err(e) => warn!(key = %key, error = %e, "Cache read failed, using store"),
        }
        self.record(false);

        let business = self
            .repo
            .find(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Business".to_string()))?;

        if let Err(e) = set_entity(self.cache.as_ref(), &key, &business, self.ttls.entity).await {
            warn!(key = %key, error = %e, "Failed to populate cache");
        }
        Ok(business)
    }

    pub async fn list(&self, filter: BusinessFilter) -> Result<Page<Business>, AppError> {
        let filter = filter.normalized();
        let key = build_key(KeyPrefix::EntityList(EntityKind::Business), [filter.fingerprint()]);

        let items = match get_json::<Vec<Business>>(self.cache.as_ref(), &key).await {
            Ok(items) => {
                self.record(true);
                items
            }
            Err(e) => {
                if e.is_miss() {
                    debug!(key = %key, "Cache miss");
                } else {
                    warn!(key = %key, error = %e, "Cache read failed, using store");
                }
                self.record(false);

                let items = self.repo.list(&filter).await?;
                if let Err(e) = set_json(self.cache.as_ref(), &key, &items, self.ttls.list).await {
                    warn!(key = %key, error = %e, "Failed to populate cache");
                }
                items
            }
        };

        Ok(Page {
            items,
            page: filter.page,
            per_page: filter.per_page,
        })
    }

    pub async fn create(&self, owner: &AuthenticatedIdentity, new_business: NewBusiness) -> Result<Business, AppError> {
        new_business.validate().map_err(AppError::Validation)?;

        let business = self.repo.insert(owner.user_id, &new_business).await?;
        info!(business_id = %business.id, owner_id = %owner.user_id, "Business created");

        self.invalidate(business.id).await;
        Ok(business)
    }

    pub async fn update(
        &self,
        actor: &AuthenticatedIdentity,
        id: Uuid,
        update: BusinessUpdate,
    ) -> Result<Business, AppError> {
        if update.is_empty() {
            return Err(AppError::Validation("No fields to update".to_string()));
        }
        self.authorize(actor, id).await?;

        let business = self
            .repo
            .update(id, &update)
            .await?
            .ok_or_else(|| AppError::NotFound("Business".to_string()))?;
        info!(business_id = %id, actor = %actor.user_id, "Business updated");

        self.invalidate(id).await;
        Ok(business)
    }

    pub async fn delete(&self, actor: &AuthenticatedIdentity, id: Uuid) -> Result<(), AppError> {
        self.authorize(actor, id).await?;

        if !self.repo.delete(id).await? {
            return Err(AppError::NotFound("Business".to_string()));
        }
        info!(business_id = %id, actor = %actor.user_id, "Business deleted");

        self.invalidate(id).await;
        Ok(())
    }

    /// Ownership is checked against the store, never the cache
    async fn authorize(&self, actor: &AuthenticatedIdentity, id: Uuid) -> Result<(), AppError> {
        let existing = self
            .repo
            .find(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Business".to_string()))?;

        if !actor.can_manage(existing.owner_id) {
            return Err(AppError::Forbidden("Only the owner can modify this business".to_string()));
        }
        Ok(())
    }

    async fn invalidate(&self, id: Uuid) {
        // The write already committed; a failed invalidation leaves stale
        // entries that expire with their TTL
        if let Err(e) = invalidate_entity(self.cache.as_ref(), EntityKind::Business, &id.to_string()).await {
            warn!(business_id = %id, error = %e, "Cache invalidation failed");
        }
    }
}
