// Authorization gate: rejection order and downstream role gates

use crate::common::{test_tokens, test_user, MockUserDirectory, TEST_SECRET};
use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::{from_fn, from_fn_with_state, Next},
    routing::get,
    Router,
};
use business_hub::auth::audit_logger::AuditLogger;
use business_hub::auth::{auth_middleware, require_entrepreneur, require_role, AuthState};
use business_hub::core::models::{AuthenticatedIdentity, User, UserRole};
use business_hub::core::token::{FixedClock, TokenService};
use business_hub::metrics::Metrics;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct Harness {
    router: Router,
    directory: Arc<MockUserDirectory>,
    metrics: Arc<Metrics>,
    tokens: Arc<TokenService>,
}

async fn whoami(identity: AuthenticatedIdentity) -> String {
    identity.email
}

fn harness(users: Vec<User>) -> Harness {
    let directory = Arc::new(MockUserDirectory::default());
    for user in users {
        directory.users.lock().unwrap().insert(user.id, user);
    }
    let metrics = Arc::new(Metrics::new().unwrap());
    let tokens = test_tokens();

    let auth_state = Arc::new(AuthState {
        tokens: tokens.clone(),
        directory: directory.clone(),
        audit_logger: Arc::new(AuditLogger::new(None)),
        metrics: Some(metrics.clone()),
    });

    let admin_only = Router::new()
        .route("/admin", get(whoami))
        .route_layer(from_fn(|request: Request<Body>, next: Next| {
            require_role(UserRole::Admin, request, next)
        }));
    let entrepreneurs = Router::new()
        .route("/owners", get(whoami))
        .route_layer(from_fn(require_entrepreneur));

    let router = Router::new()
        .route("/me", get(whoami))
        .merge(admin_only)
        .merge(entrepreneurs)
        .route_layer(from_fn_with_state(auth_state, auth_middleware));

    Harness {
        router,
        directory,
        metrics,
        tokens,
    }
}

async fn call(router: &Router, path: &str, authorization: Option<String>) -> StatusCode {
    let mut builder = Request::builder().uri(path);
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, value);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    response.status()
}

fn bearer(token: &str) -> Option<String> {
    Some(format!("Bearer {}", token))
}

#[tokio::test]
async fn test_missing_token_is_401_without_lookup() {
    let h = harness(vec![]);

    assert_eq!(call(&h.router, "/me", None).await, StatusCode::UNAUTHORIZED);
    assert_eq!(
        call(&h.router, "/me", Some("Basic dXNlcjpwYXNz".to_string())).await,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(h.directory.lookups(), 0);
}

#[tokio::test]
async fn test_expired_and_invalid_tokens_are_401_with_distinct_messages() {
    let user = test_user(true, true, false);
    let h = harness(vec![user.clone()]);

    let an_hour_ago = chrono::Utc::now().timestamp() - 3600;
    let past = TokenService::with_clock(TEST_SECRET, Duration::from_secs(60), Arc::new(FixedClock(an_hour_ago)))
        .unwrap();
    let expired = past.issue(&user.id.to_string()).unwrap();

    let request = Request::builder()
        .uri("/me")
        .header(AUTHORIZATION, format!("Bearer {}", expired))
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
    let expired_message: serde_json::Value = serde_json::from_slice(&body).unwrap();

    let request = Request::builder()
        .uri("/me")
        .header(AUTHORIZATION, "Bearer not.a.token")
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
    let invalid_message: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(expired_message["error"], "Token expired, please log in again");
    assert_eq!(invalid_message["error"], "Invalid token");
    assert_eq!(h.directory.lookups(), 0);
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_401() {
    let user = test_user(true, true, false);
    let h = harness(vec![user.clone()]);
    let foreign = TokenService::new("another-secret-another-secret-xx", Duration::from_secs(60)).unwrap();

    let token = foreign.issue(&user.id.to_string()).unwrap();
    assert_eq!(call(&h.router, "/me", bearer(&token)).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_user_is_404() {
    let h = harness(vec![]);
    let token = h.tokens.issue(&uuid::Uuid::new_v4().to_string()).unwrap();

    assert_eq!(call(&h.router, "/me", bearer(&token)).await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_non_uuid_subject_is_401() {
    let h = harness(vec![]);
    let token = h.tokens.issue("not-a-uuid").unwrap();

    assert_eq!(call(&h.router, "/me", bearer(&token)).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_inactive_and_unverified_are_403() {
    let inactive = test_user(false, true, false);
    let unverified = test_user(true, false, false);
    let h = harness(vec![inactive.clone(), unverified.clone()]);

    let token = h.tokens.issue(&inactive.id.to_string()).unwrap();
    assert_eq!(call(&h.router, "/me", bearer(&token)).await, StatusCode::FORBIDDEN);

    let token = h.tokens.issue(&unverified.id.to_string()).unwrap();
    assert_eq!(call(&h.router, "/me", bearer(&token)).await, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_lookup_failure_is_500() {
    let user = test_user(true, true, false);
    let h = harness(vec![user.clone()]);
    h.directory.should_fail.store(true, Ordering::SeqCst);

    let token = h.tokens.issue(&user.id.to_string()).unwrap();
    assert_eq!(
        call(&h.router, "/me", bearer(&token)).await,
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[tokio::test]
async fn test_valid_token_attaches_identity() {
    let user = test_user(true, true, false);
    let h = harness(vec![user.clone()]);
    let token = h.tokens.issue(&user.id.to_string()).unwrap();

    let request = Request::builder()
        .uri("/me")
        .header(AUTHORIZATION, format!("bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
    assert_eq!(body, user.email.as_bytes());
}

#[tokio::test]
async fn test_role_gates_read_identity_without_new_lookups() {
    let member = test_user(true, true, false);
    let owner = test_user(true, true, true);
    let h = harness(vec![member.clone(), owner.clone()]);

    let member_token = h.tokens.issue(&member.id.to_string()).unwrap();
    let owner_token = h.tokens.issue(&owner.id.to_string()).unwrap();

    assert_eq!(call(&h.router, "/admin", bearer(&member_token)).await, StatusCode::FORBIDDEN);
    assert_eq!(call(&h.router, "/owners", bearer(&member_token)).await, StatusCode::FORBIDDEN);
    assert_eq!(call(&h.router, "/owners", bearer(&owner_token)).await, StatusCode::OK);

    // One lookup per request, made by the gate itself
    assert_eq!(h.directory.lookups(), 3);
}

#[tokio::test]
async fn test_failures_are_counted_by_reason() {
    let h = harness(vec![]);
    call(&h.router, "/me", None).await;
    call(&h.router, "/me", bearer("garbage")).await;

    assert_eq!(h.metrics.auth_failures.with_label_values(&["missing_token"]).get(), 1);
    assert_eq!(h.metrics.auth_failures.with_label_values(&["invalid_token"]).get(), 1);
}
