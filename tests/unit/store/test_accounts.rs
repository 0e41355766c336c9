// Account writes through the unit of work

use crate::common::{fake_accounts, new_user};
use business_hub::core::errors::StoreError;
use business_hub::store::UserRepository;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_create_account_writes_all_rows_in_one_commit() {
    let (store, tables, accounts) = fake_accounts();

    let user = accounts.create_account(new_user("ada@example.com")).await.unwrap();

    let db = tables.db.lock().unwrap();
    assert!(db.users.contains_key(&user.id));
    assert!(db.preferences.contains(&user.id));
    assert_eq!(db.profiles.get(&user.id).map(String::as_str), Some("Ada Lovelace"));
    assert_eq!(store.commits.load(Ordering::SeqCst), 1);
    assert_eq!(store.rollbacks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_profile_insert_leaves_nothing_behind() {
    let (store, tables, accounts) = fake_accounts();
    tables.fail_profile_insert.store(true, Ordering::SeqCst);

    let result = accounts.create_account(new_user("ada@example.com")).await;

    assert!(matches!(result, Err(StoreError::Backend(_))));
    assert_eq!(tables.user_count(), 0);
    assert!(tables.db.lock().unwrap().preferences.is_empty());
    assert_eq!(store.commits.load(Ordering::SeqCst), 0);
    assert_eq!(store.rollbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_commit_failure_is_transaction_failed() {
    let (store, tables, accounts) = fake_accounts();
    store.commit_should_fail.store(true, Ordering::SeqCst);

    let result = accounts.create_account(new_user("ada@example.com")).await;

    assert!(matches!(result, Err(StoreError::TransactionFailed(_))));
    assert_eq!(tables.user_count(), 0);
}

#[tokio::test]
async fn test_duplicate_email_is_unique_violation() {
    let (_store, _tables, accounts) = fake_accounts();
    accounts.create_account(new_user("ada@example.com")).await.unwrap();

    let result = accounts.create_account(new_user("ada@example.com")).await;
    assert!(matches!(result, Err(StoreError::UniqueViolation(_))));
}

#[tokio::test]
async fn test_mark_verified() {
    let (_store, _tables, accounts) = fake_accounts();
    let user = accounts.create_account(new_user("ada@example.com")).await.unwrap();
    assert!(!user.is_verified);

    assert!(accounts.mark_verified(user.id).await.unwrap());
    assert!(accounts.find_by_id(user.id).await.unwrap().unwrap().is_verified);

    assert!(!accounts.mark_verified(uuid::Uuid::new_v4()).await.unwrap());
}
