// User persistence: per-table writes and the atomic account operations built on them

use crate::core::errors::StoreError;
use crate::core::models::{NewUser, User, UserRole};
use crate::store::{PgStore, TransactionalStore, UnitOfWork};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

/// Row-level access to the user tables
///
/// Writes take the caller's transaction; reads go straight to the store and
/// only see committed data.
#[async_trait]
pub trait UserTables: Send + Sync {
    type Tx: Send;

    async fn insert_user(&self, tx: &mut Self::Tx, id: Uuid, user: &NewUser) -> Result<User, StoreError>;

    async fn insert_preferences(&self, tx: &mut Self::Tx, user_id: Uuid) -> Result<(), StoreError>;

    async fn insert_profile(&self, tx: &mut Self::Tx, user_id: Uuid, display_name: &str) -> Result<(), StoreError>;

    /// Returns false when no such user exists
    async fn set_verified(&self, tx: &mut Self::Tx, user_id: Uuid) -> Result<bool, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
}

/// Account operations used by the service layer
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create the user, preference and profile rows as one unit
    async fn create_account(&self, user: NewUser) -> Result<User, StoreError>;

    async fn mark_verified(&self, user_id: Uuid) -> Result<bool, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
}

/// `UserRepository` over any transactional store and matching table access
pub struct Accounts<S: TransactionalStore, T: UserTables<Tx = S::Tx>> {
    uow: UnitOfWork<S>,
    tables: Arc<T>,
}

impl<S, T> Accounts<S, T>
where
    S: TransactionalStore,
    T: UserTables<Tx = S::Tx>,
{
    pub fn new(uow: UnitOfWork<S>, tables: Arc<T>) -> Self {
        Self { uow, tables }
    }
}

#[async_trait]
impl<S, T> UserRepository for Accounts<S, T>
where
    S: TransactionalStore + 'static,
    T: UserTables<Tx = S::Tx> + 'static,
{
    async fn create_account(&self, user: NewUser) -> Result<User, StoreError> {
        let tables = self.tables.clone();
        let id = Uuid::new_v4();

        self.uow
            .execute(move |tx| {
                Box::pin(async move {
                    let created = tables.insert_user(tx, id, &user).await?;
                    tables.insert_preferences(tx, id).await?;
                    tables.insert_profile(tx, id, &user.full_name).await?;
                    Ok(created)
                })
            })
            .await
    }

    async fn mark_verified(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let tables = self.tables.clone();
        self.uow
            .execute(move |tx| Box::pin(async move { tables.set_verified(tx, user_id).await }))
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.tables.find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.tables.find_by_email(email).await
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    full_name: String,
    role: String,
    is_active: bool,
    is_verified: bool,
    is_entrepreneur: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role: UserRole = row
            .role
            .parse()
            .map_err(|e: String| StoreError::Backend(format!("user {}: {}", row.id, e)))?;

        Ok(User {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            role,
            is_active: row.is_active,
            is_verified: row.is_verified,
            is_entrepreneur: row.is_entrepreneur,
            created_at: row.created_at,
        })
    }
}

const USER_COLUMNS: &str = "id, email, full_name, role, is_active, is_verified, is_entrepreneur, created_at";

/// Postgres user tables
pub struct PgUserTables {
    db_pool: PgPool,
}

impl PgUserTables {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserTables for PgUserTables {
    type Tx = Transaction<'static, Postgres>;

    async fn insert_user(&self, tx: &mut Self::Tx, id: Uuid, user: &NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, email, full_name, role, is_entrepreneur)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .bind(user.email.trim().to_lowercase())
        .bind(user.full_name.trim())
        .bind(user.role().as_str())
        .bind(user.is_entrepreneur)
        .fetch_one(&mut **tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        row.try_into()
    }

    async fn insert_preferences(&self, tx: &mut Self::Tx, user_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO user_preferences (user_id) VALUES ($1)")
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn insert_profile(&self, tx: &mut Self::Tx, user_id: Uuid, display_name: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO user_profiles (user_id, display_name) VALUES ($1, $2)")
            .bind(user_id)
            .bind(display_name.trim())
            .execute(&mut **tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn set_verified(&self, tx: &mut Self::Tx, user_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET is_verified = TRUE WHERE id = $1")
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS))
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.db_pool)
            .await?;

        row.map(User::try_from).transpose()
    }
}

/// Production wiring: Postgres tables under a Postgres unit of work
pub fn pg_accounts(store: Arc<PgStore>) -> Accounts<PgStore, PgUserTables> {
    let tables = Arc::new(PgUserTables::new(store.pool().clone()));
    Accounts::new(UnitOfWork::new(store), tables)
}
