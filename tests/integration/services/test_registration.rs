// Registration is atomic: a failed write leaves no account, code or email behind

use crate::common::{new_user, TestApp};
use business_hub::core::errors::AppError;
use business_hub::queue::NOTIFICATIONS_QUEUE;
use business_hub::state::{CacheStore, KeyPrefix};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_failed_profile_insert_rolls_back_registration() {
    let app = TestApp::new().await;
    app.tables.fail_profile_insert.store(true, Ordering::SeqCst);

    let result = app.users.register(new_user("ada@example.com")).await;

    assert!(matches!(result, Err(AppError::Store(_))));
    assert_eq!(app.tables.user_count(), 0);
    assert_eq!(app.store.rollbacks.load(Ordering::SeqCst), 1);
    assert!(app
        .cache
        .scan(&KeyPrefix::EmailVerification.pattern())
        .await
        .unwrap()
        .is_empty());
    assert!(app.cache.scan(&KeyPrefix::RefreshToken.pattern()).await.unwrap().is_empty());
    assert_eq!(app.broker.ready_len(NOTIFICATIONS_QUEUE).await, 0);
}

#[tokio::test]
async fn test_successful_registration_queues_one_verification_email() {
    let app = TestApp::new().await;

    let (user, tokens) = app.users.register(new_user("ada@example.com")).await.unwrap();

    assert_eq!(app.tables.user_count(), 1);
    assert_eq!(app.store.commits.load(Ordering::SeqCst), 1);
    assert_eq!(app.tokens.verify(&tokens.access_token).unwrap(), user.id.to_string());
    assert_eq!(app.broker.ready_len(NOTIFICATIONS_QUEUE).await, 1);
}

#[tokio::test]
async fn test_registration_survives_unavailable_queue() {
    let app = TestApp::new().await;
    app.queue.close().await.unwrap();

    // Email delivery is best-effort; the account still exists
    let (user, _) = app.users.register(new_user("ada@example.com")).await.unwrap();
    assert!(app.users.get_profile(user.id).await.is_ok());
}

#[tokio::test]
async fn test_refresh_of_disabled_account_is_forbidden() {
    let app = TestApp::new().await;
    let (user, tokens) = app.users.register(new_user("ada@example.com")).await.unwrap();
    app.tables.db.lock().unwrap().users.get_mut(&user.id).unwrap().is_active = false;

    let result = app.users.refresh(&tokens.refresh_token).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}
