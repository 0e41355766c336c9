// Security event logging

use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Authentication event type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    AuthSuccess,
    AuthFailure { reason: String },
}

impl AuthEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AuthEvent::AuthSuccess => "AUTH_SUCCESS",
            AuthEvent::AuthFailure { .. } => "AUTH_FAILURE",
        }
    }
}

/// Audit logger for authentication events
pub struct AuditLogger {
    db_pool: Option<Arc<PgPool>>,
}

impl AuditLogger {
    /// If `db_pool` is `None`, events only go to the structured log.
    pub fn new(db_pool: Option<Arc<PgPool>>) -> Self {
        Self { db_pool }
    }

    /// Record an authentication event without blocking the request
    pub fn log_auth_event(
        &self,
        event: AuthEvent,
        user_id: Option<Uuid>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) {
        let db_pool = self.db_pool.clone();
        let ip = ip_address.map(|s| s.to_string());
        let ua = user_agent.map(|s| s.to_string());

        tokio::spawn(async move {
            match &event {
                AuthEvent::AuthSuccess => {
                    info!(user_id = ?user_id, ip_address = ?ip, user_agent = ?ua, "Authentication successful");
                }
                AuthEvent::AuthFailure { reason } => {
                    warn!(
                        user_id = ?user_id,
                        ip_address = ?ip,
                        user_agent = ?ua,
                        reason = %reason,
                        "Authentication failed"
                    );
                }
            }

            let Some(pool) = db_pool else {
                return;
            };
            let reason = match &event {
                AuthEvent::AuthFailure { reason } => Some(reason.as_str()),
                AuthEvent::AuthSuccess => None,
            };

            if let Err(e) = sqlx::query(
                "INSERT INTO auth_events (event_type, user_id, ip_address, user_agent, reason)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(event.event_type())
            .bind(user_id)
            .bind(ip.as_deref())
            .bind(ua.as_deref())
            .bind(reason)
            .execute(pool.as_ref())
            .await
            {
                warn!(error = %e, "Failed to persist auth event");
            }
        });
    }
}
