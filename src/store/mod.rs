// Relational store: transactions, the unit-of-work coordinator and repositories

pub mod businesses;
pub mod postgres;
pub mod unit_of_work;
pub mod users;

use crate::core::errors::StoreError;
use async_trait::async_trait;

pub use businesses::{BusinessRepository, PgBusinessRepository};
pub use postgres::{PgStore, PoolSettings};
pub use unit_of_work::UnitOfWork;
pub use users::{pg_accounts, Accounts, PgUserTables, UserRepository, UserTables};

/// A store that can open, commit and roll back transactions
///
/// Dropping an open `Tx` without committing must discard its writes.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;
}
