// Business persistence

use crate::core::errors::StoreError;
use crate::core::models::{Business, BusinessFilter, BusinessUpdate, NewBusiness};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[async_trait]
pub trait BusinessRepository: Send + Sync {
    async fn insert(&self, owner_id: Uuid, business: &NewBusiness) -> Result<Business, StoreError>;

    async fn find(&self, id: Uuid) -> Result<Option<Business>, StoreError>;

    /// Page of businesses matching the filter, newest first
    async fn list(&self, filter: &BusinessFilter) -> Result<Vec<Business>, StoreError>;

    /// `None` when no such business exists
    async fn update(&self, id: Uuid, update: &BusinessUpdate) -> Result<Option<Business>, StoreError>;

    /// Returns false when nothing was deleted
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

#[derive(FromRow)]
struct BusinessRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    category: String,
    city: String,
    description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BusinessRow> for Business {
    fn from(row: BusinessRow) -> Self {
        Business {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            category: row.category,
            city: row.city,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const BUSINESS_COLUMNS: &str = "id, owner_id, name, category, city, description, created_at, updated_at";

pub struct PgBusinessRepository {
    db_pool: PgPool,
}

impl PgBusinessRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl BusinessRepository for PgBusinessRepository {
    async fn insert(&self, owner_id: Uuid, business: &NewBusiness) -> Result<Business, StoreError> {
        let row = sqlx::query_as::<_, BusinessRow>(&format!(
            "INSERT INTO businesses (id, owner_id, name, category, city, description)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            BUSINESS_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(business.name.trim())
        .bind(business.category.trim())
        .bind(business.city.trim())
        .bind(&business.description)
        .fetch_one(&self.db_pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(row.into())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Business>, StoreError> {
        let row = sqlx::query_as::<_, BusinessRow>(&format!("SELECT {} FROM businesses WHERE id = $1", BUSINESS_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(row.map(Business::from))
    }

    async fn list(&self, filter: &BusinessFilter) -> Result<Vec<Business>, StoreError> {
        let rows = sqlx::query_as::<_, BusinessRow>(&format!(
            "SELECT {}
             FROM businesses
             WHERE ($1::TEXT IS NULL OR category = $1)
               AND ($2::TEXT IS NULL OR city = $2)
             ORDER BY created_at DESC, id
             LIMIT $3 OFFSET $4",
            BUSINESS_COLUMNS
        ))
        .bind(filter.category.as_deref())
        .bind(filter.city.as_deref())
        .bind(filter.per_page as i64)
        .bind(filter.offset())
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows.into_iter().map(Business::from).collect())
    }

    async fn update(&self, id: Uuid, update: &BusinessUpdate) -> Result<Option<Business>, StoreError> {
        let row = sqlx::query_as::<_, BusinessRow>(&format!(
            "UPDATE businesses SET
                 name = COALESCE($2, name),
                 category = COALESCE($3, category),
                 city = COALESCE($4, city),
                 description = COALESCE($5, description),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            BUSINESS_COLUMNS
        ))
        .bind(id)
        .bind(update.name.as_deref())
        .bind(update.category.as_deref())
        .bind(update.city.as_deref())
        .bind(update.description.as_deref())
        .fetch_optional(&self.db_pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(row.map(Business::from))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM businesses WHERE id = $1")
            .bind(id)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
