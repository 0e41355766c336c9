// Domain error types - Secure error handling with no information disclosure

use thiserror::Error;

/// Main error type for the service layer
#[derive(Error, Debug)]
pub enum AppError {
    /// Bearer token missing or rejected (HTTP 401)
    #[error("Authentication error: {0}")]
    Token(#[from] TokenError),

    /// Missing credentials (HTTP 401)
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated but not allowed (HTTP 403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Entity does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request payload rejected (HTTP 400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unique constraint or state conflict (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Relational store failure, transaction rolled back (HTTP 500)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Cache failure on a path where the cache is authoritative (HTTP 500)
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Broker failure surfaced to the caller (HTTP 503)
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Configuration error (HTTP 500)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected failure with no better category (HTTP 500)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Bearer token failures
///
/// `Expired` is only reported for tokens whose signature verified; a forged token
/// is always `Invalid` regardless of its claims.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("token signature or algorithm is invalid")]
    InvalidSignature,

    #[error("token is malformed: {0}")]
    Malformed(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    pub fn is_expired(&self) -> bool {
        matches!(self, TokenError::Expired)
    }
}

/// Cache failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Key absent. Expected, never logged as an error.
    #[error("cache miss")]
    Miss,

    /// Store unreachable or operation timed out. Retryable.
    #[error("transient cache error: {0}")]
    Transient(String),

    /// Value present but not decodable into the requested type
    #[error("cached value could not be decoded: {0}")]
    Decode(String),
}

impl CacheError {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss)
    }
}

/// Message broker failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Broker unreachable or operation failed. Retryable.
    #[error("transient broker error: {0}")]
    Transient(String),

    /// Queue was never declared
    #[error("queue '{0}' has not been declared")]
    UnknownQueue(String),

    /// No binding for the exchange/routing key pair
    #[error("no queue bound to exchange '{exchange}' with routing key '{routing_key}'")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },

    /// Delivery handle already resolved or never issued
    #[error("unknown delivery handle '{0}'")]
    UnknownDelivery(String),

    /// Stored envelope could not be decoded. Not retryable.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The queue has been closed
    #[error("message queue is closed")]
    Closed,
}

/// Email notification failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("unknown template '{0}'")]
    UnknownTemplate(String),

    #[error("failed to load templates: {0}")]
    TemplateLoad(String),

    #[error("mail delivery failed: {0}")]
    Send(String),

    #[error("mailer configuration error: {0}")]
    Configuration(String),
}

/// Relational store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Map a sqlx error, lifting unique violations into their own kind
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation(db_err.message().to_string());
            }
        }
        StoreError::Database(err)
    }
}

impl AppError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Token(TokenError::Signing(_)) => 500,
            AppError::Token(_) => 401,
            AppError::Unauthenticated(_) => 401,
            AppError::Forbidden(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Validation(_) => 400,
            AppError::Conflict(_) => 409,
            AppError::Store(StoreError::UniqueViolation(_)) => 409,
            AppError::Store(_) => 500,
            AppError::Cache(_) => 500,
            AppError::Queue(_) => 503,
            AppError::Configuration(_) | AppError::Internal(_) => 500,
        }
    }

    /// Get user-friendly error message (no sensitive information)
    pub fn user_message(&self) -> String {
        match self {
            AppError::Token(TokenError::Expired) => "Token expired, please log in again".to_string(),
            AppError::Token(TokenError::Signing(_)) => "Internal error".to_string(),
            AppError::Token(_) => "Invalid token".to_string(),
            AppError::Unauthenticated(reason) => reason.clone(),
            AppError::Forbidden(reason) => reason.clone(),
            AppError::NotFound(what) => format!("{} not found", what),
            AppError::Validation(reason) => reason.clone(),
            AppError::Conflict(reason) => reason.clone(),
            AppError::Store(StoreError::UniqueViolation(_)) => "Resource already exists".to_string(),
            AppError::Store(_) => "Internal error".to_string(),
            AppError::Cache(_) => "Internal error".to_string(),
            AppError::Queue(_) => "Service unavailable".to_string(),
            AppError::Configuration(_) | AppError::Internal(_) => "Internal error".to_string(),
        }
    }
}
