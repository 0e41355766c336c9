// Axum authorization gate: bearer token, account state, role checks

use crate::api::responses::ErrorResponse;
use crate::auth::audit_logger::{AuditLogger, AuthEvent};
use crate::core::errors::{StoreError, TokenError};
use crate::core::models::{AuthenticatedIdentity, User, UserRole};
use crate::core::token::TokenService;
use crate::metrics::Metrics;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{Json, Response},
};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

pub type Rejection = (StatusCode, Json<ErrorResponse>);

/// Account lookup used by the gate
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;
}

/// Authentication state containing all dependencies
#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<TokenService>,
    pub directory: Arc<dyn UserDirectory>,
    pub audit_logger: Arc<AuditLogger>,
    pub metrics: Option<Arc<Metrics>>,
}

fn reject(status: StatusCode, message: &str) -> Rejection {
    (status, Json(ErrorResponse::new(message)))
}

/// Authenticate the request and attach its `AuthenticatedIdentity`
///
/// Checks run in order and the first failure wins:
/// 1. missing bearer token: 401
/// 2. expired token: 401 (distinct message), any other token failure: 401
/// 3. subject does not resolve to a user: 404
/// 4. inactive account, then unverified email: 403
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let ip = extract_ip_address(request.headers());
    let user_agent = extract_user_agent(request.headers());

    let fail = |reason: &'static str, user_id: Option<Uuid>, status: StatusCode, message: &str| {
        if let Some(metrics) = &auth_state.metrics {
            metrics.auth_failures.with_label_values(&[reason]).inc();
        }
        auth_state.audit_logger.log_auth_event(
            AuthEvent::AuthFailure {
                reason: reason.to_string(),
            },
            user_id,
            ip.as_deref(),
            user_agent.as_deref(),
        );
        reject(status, message)
    };

    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| fail("missing_token", None, StatusCode::UNAUTHORIZED, "Missing bearer token"))?;

    let subject = match auth_state.tokens.verify(&token) {
        Ok(subject) => subject,
        Err(TokenError::Expired) => {
            return Err(fail(
                "expired_token",
                None,
                StatusCode::UNAUTHORIZED,
                "Token expired, please log in again",
            ))
        }
        Err(_) => return Err(fail("invalid_token", None, StatusCode::UNAUTHORIZED, "Invalid token")),
    };

    let user_id = Uuid::parse_str(&subject)
        .map_err(|_| fail("invalid_subject", None, StatusCode::UNAUTHORIZED, "Invalid token"))?;

    let user = match auth_state.directory.find_user(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(fail("unknown_user", Some(user_id), StatusCode::NOT_FOUND, "User not found")),
        Err(e) => {
            error!(user_id = %user_id, error = %e, "User lookup failed");
            return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "Internal error"));
        }
    };

    if !user.is_active {
        return Err(fail("inactive", Some(user_id), StatusCode::FORBIDDEN, "Account is disabled"));
    }
    if !user.is_verified {
        return Err(fail("unverified", Some(user_id), StatusCode::FORBIDDEN, "Email address not verified"));
    }

    auth_state
        .audit_logger
        .log_auth_event(AuthEvent::AuthSuccess, Some(user_id), ip.as_deref(), user_agent.as_deref());

    request.extensions_mut().insert(AuthenticatedIdentity::from(&user));
    Ok(next.run(request).await)
}

fn identity_of(request: &Request) -> Result<&AuthenticatedIdentity, Rejection> {
    request
        .extensions()
        .get::<AuthenticatedIdentity>()
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Missing bearer token"))
}

/// Require `required` (or admin). Runs after `auth_middleware` and only reads
/// the attached identity.
pub async fn require_role(required: UserRole, request: Request, next: Next) -> Result<Response, Rejection> {
    if !identity_of(&request)?.role.satisfies(required) {
        return Err(reject(StatusCode::FORBIDDEN, "Insufficient role"));
    }
    Ok(next.run(request).await)
}

/// Require an entrepreneur account (admins pass)
pub async fn require_entrepreneur(request: Request, next: Next) -> Result<Response, Rejection> {
    let identity = identity_of(&request)?;
    if !(identity.is_entrepreneur || identity.role.satisfies(UserRole::Entrepreneur)) {
        return Err(reject(StatusCode::FORBIDDEN, "Entrepreneur account required"));
    }
    Ok(next.run(request).await)
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedIdentity {
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedIdentity>()
            .cloned()
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Missing bearer token"))
    }
}

/// Extract the token from `Authorization: Bearer <token>`; the scheme is
/// matched case-insensitively
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token.to_string())
    } else {
        None
    }
}

/// Checks `X-Forwarded-For` first (for proxied requests), then `X-Real-IP`
fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Forwarded-For")
        .or_else(|| headers.get("X-Real-IP"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("User-Agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
