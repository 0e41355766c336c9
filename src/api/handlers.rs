// Request handlers for API endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::responses::{ApiError, HealthResponse, RegisteredResponse};
use crate::api::AppState;
use crate::core::errors::AppError;
use crate::core::models::{
    AuthenticatedIdentity, Business, BusinessFilter, BusinessUpdate, NewBusiness, NewUser, Page, TokenPair, User,
};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub user_id: Uuid,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Check a dependency with a short deadline and describe the outcome
async fn check_dependency<F, E>(name: &str, check: F) -> String
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, check).await {
        Ok(Ok(())) => "connected".to_string(),
        Ok(Err(e)) => {
            warn!(dependency = name, error = %e, "Health check failed");
            "unavailable".to_string()
        }
        Err(_) => {
            debug!(dependency = name, "Health check timed out");
            "slow: timeout".to_string()
        }
    }
}

/// GET /health
///
/// Always 200; dependency states are reported in the body so the process
/// stays up while a backend recovers.
pub async fn health_handler(State(app_state): State<AppState>) -> Json<HealthResponse> {
    let cache_status = check_dependency("cache", app_state.cache.ping()).await;

    let database_status = match app_state.database {
        Some(ref database) => check_dependency("database", database.ping()).await,
        None => "not configured".to_string(),
    };

    let queue_status = if app_state.queue.is_closed() {
        "closed"
    } else {
        "running"
    };

    let healthy = cache_status == "connected" && database_status != "unavailable" && !app_state.queue.is_closed();

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        cache: cache_status,
        database: database_status,
        queue: queue_status.to_string(),
    })
}

/// GET /metrics (Prometheus text format)
pub async fn metrics_handler(State(app_state): State<AppState>) -> Result<String, ApiError> {
    app_state
        .metrics
        .render()
        .map_err(|e| AppError::Internal(format!("metrics encoding failed: {}", e)).into())
}

/// POST /v1/users
pub async fn register_handler(
    State(app_state): State<AppState>,
    Json(new_user): Json<NewUser>,
) -> Result<Response, ApiError> {
    let (user, tokens) = app_state.users.register(new_user).await?;
    Ok((StatusCode::CREATED, Json(RegisteredResponse { user, tokens })).into_response())
}

/// POST /v1/users/verify
///
/// Not behind the gate: the gate rejects unverified accounts.
pub async fn verify_email_handler(
    State(app_state): State<AppState>,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<StatusCode, ApiError> {
    app_state.users.verify_email(request.user_id, &request.code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/users/verify/resend
///
/// Answers 202 whether or not the address is known.
pub async fn resend_verification_handler(
    State(app_state): State<AppState>,
    Json(request): Json<ResendVerificationRequest>,
) -> Result<StatusCode, ApiError> {
    app_state.users.resend_verification(&request.email).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /v1/auth/refresh
pub async fn refresh_handler(
    State(app_state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    Ok(Json(app_state.users.refresh(&request.refresh_token).await?))
}

/// GET /v1/users/me
pub async fn me_handler(
    State(app_state): State<AppState>,
    identity: AuthenticatedIdentity,
) -> Result<Json<User>, ApiError> {
    Ok(Json(app_state.users.get_profile(identity.user_id).await?))
}

/// GET /v1/businesses?category=&city=&page=&per_page=
pub async fn list_businesses_handler(
    State(app_state): State<AppState>,
    Query(filter): Query<BusinessFilter>,
) -> Result<Json<Page<Business>>, ApiError> {
    Ok(Json(app_state.businesses.list(filter).await?))
}

/// GET /v1/businesses/:id
pub async fn get_business_handler(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Business>, ApiError> {
    Ok(Json(app_state.businesses.get_by_id(id).await?))
}

/// POST /v1/businesses
pub async fn create_business_handler(
    State(app_state): State<AppState>,
    identity: AuthenticatedIdentity,
    Json(new_business): Json<NewBusiness>,
) -> Result<Response, ApiError> {
    let business = app_state.businesses.create(&identity, new_business).await?;
    Ok((StatusCode::CREATED, Json(business)).into_response())
}

/// PUT /v1/businesses/:id
pub async fn update_business_handler(
    State(app_state): State<AppState>,
    identity: AuthenticatedIdentity,
    Path(id): Path<Uuid>,
    Json(update): Json<BusinessUpdate>,
) -> Result<Json<Business>, ApiError> {
    Ok(Json(app_state.businesses.update(&identity, id, update).await?))
}

/// DELETE /v1/businesses/:id
pub async fn delete_business_handler(
    State(app_state): State<AppState>,
    identity: AuthenticatedIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    app_state.businesses.delete(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
