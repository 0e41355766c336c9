// Axum web server layer

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    BoxError, Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub mod handlers;
pub mod responses;

use crate::auth::{auth_middleware, require_entrepreneur, AuthState};
use crate::metrics::Metrics;
use crate::queue::MessageQueue;
use crate::services::{BusinessService, UserService};
use crate::state::CacheStore;
use crate::store::PgStore;
use responses::ErrorResponse;

pub use crate::config::Config;

/// Application state containing all shared dependencies
///
/// Cloned per request by Axum, so every component sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: Arc<UserService>,
    pub businesses: Arc<BusinessService>,
    pub cache: Arc<dyn CacheStore>,
    pub queue: Arc<MessageQueue>,
    /// `None` when running without a database (tests)
    pub database: Option<Arc<PgStore>>,
    pub metrics: Arc<Metrics>,
}

/// Create the Axum router with all routes and middleware
///
/// Middleware stack (outermost to innermost):
/// - Request timeout (tower::timeout), 408 on elapse
/// - Body size limit (tower-http::limit)
/// - Tracing (tower-http::trace)
/// - Authorization gate, on protected routes only
pub fn create_router(app_state: AppState, auth_state: Arc<AuthState>) -> Router {
    let public = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/v1/users", post(handlers::register_handler))
        .route("/v1/users/verify", post(handlers::verify_email_handler))
        .route("/v1/users/verify/resend", post(handlers::resend_verification_handler))
        .route("/v1/auth/refresh", post(handlers::refresh_handler))
        .route("/v1/businesses", get(handlers::list_businesses_handler))
        .route("/v1/businesses/:id", get(handlers::get_business_handler));

    let authenticated = Router::new()
        .route("/v1/users/me", get(handlers::me_handler))
        .route_layer(from_fn_with_state(auth_state.clone(), auth_middleware));

    // route_layer wraps outward, so the gate runs before the entrepreneur check
    let entrepreneur = Router::new()
        .route("/v1/businesses", post(handlers::create_business_handler))
        .route(
            "/v1/businesses/:id",
            put(handlers::update_business_handler).delete(handlers::delete_business_handler),
        )
        .route_layer(from_fn(require_entrepreneur))
        .route_layer(from_fn_with_state(auth_state, auth_middleware));

    let body_limit = app_state.config.body_size_limit_bytes;
    let timeout_secs = app_state.config.request_timeout_secs;

    // HandleErrorLayer must sit outside the timeout to catch its error
    let timeout_stack = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|e: BoxError| async move {
            let (status, message) = if e.is::<tower::timeout::error::Elapsed>() {
                (StatusCode::REQUEST_TIMEOUT, "Request timed out")
            } else {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
            };
            (status, Json(ErrorResponse::new(message)))
        }))
        .timeout(Duration::from_secs(timeout_secs));

    public
        .merge(authenticated)
        .merge(entrepreneur)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(timeout_stack)
        .with_state(app_state)
}
