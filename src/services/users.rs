// Account lifecycle: registration, email verification and token refresh

use crate::auth::gate::UserDirectory;
use crate::core::errors::{AppError, CacheError, StoreError};
use crate::core::models::{NewUser, TokenPair, User};
use crate::core::token::TokenService;
use crate::services::notifications::NotificationPublisher;
use crate::state::{build_key, CacheStore, CacheValue, KeyPrefix};
use crate::store::UserRepository;
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const VERIFY_EMAIL_TEMPLATE: &str = "verify_email";

/// Lifetimes of the credentials kept in the cache
#[derive(Debug, Clone)]
pub struct CredentialTtls {
    pub refresh_token: Duration,
    pub verification_code: Duration,
}

impl Default for CredentialTtls {
    fn default() -> Self {
        Self {
            refresh_token: Duration::from_secs(7 * 24 * 3600),
            verification_code: Duration::from_secs(15 * 60),
        }
    }
}

pub struct UserService {
    users: Arc<dyn UserRepository>,
    cache: Arc<dyn CacheStore>,
    tokens: Arc<TokenService>,
    notifications: Option<Arc<NotificationPublisher>>,
    ttls: CredentialTtls,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        cache: Arc<dyn CacheStore>,
        tokens: Arc<TokenService>,
        ttls: CredentialTtls,
    ) -> Self {
        Self {
            users,
            cache,
            tokens,
            notifications: None,
            ttls,
        }
    }

    pub fn with_notifications(mut self, publisher: Arc<NotificationPublisher>) -> Self {
        self.notifications = Some(publisher);
        self
    }

    /// Create an account and sign the new user in
    ///
    /// The user, preference and profile rows are written atomically. Sending
    /// the verification email is best-effort and never fails registration.
    pub async fn register(&self, new_user: NewUser) -> Result<(User, TokenPair), AppError> {
        new_user.validate().map_err(AppError::Validation)?;

        if self.users.find_by_email(&new_user.email).await?.is_some() {
            return Err(AppError::Conflict("Email address already registered".to_string()));
        }

        let user = self.users.create_account(new_user).await.map_err(|e| match e {
            StoreError::UniqueViolation(_) => AppError::Conflict("Email address already registered".to_string()),
            other => AppError::Store(other),
        })?;
        info!(user_id = %user.id, "User registered");

        self.send_verification_code(&user).await;

        let pair = self.issue_pair(user.id).await?;
        Ok((user, pair))
    }

    /// Consume a verification code. Wrong, expired and already used codes are
    /// indistinguishable to the caller.
    pub async fn verify_email(&self, user_id: Uuid, code: &str) -> Result<(), AppError> {
        let key = build_key(KeyPrefix::EmailVerification, [user_id.to_string()]);
        let invalid = || AppError::Validation("Invalid or expired verification code".to_string());

        // Single use: a wrong guess burns the code
        let stored = match self.cache.get_and_delete(&key).await {
            Ok(value) => value.into_text()?,
            Err(CacheError::Miss) => return Err(invalid()),
            Err(e) => return Err(e.into()),
        };
        if stored != code.trim() {
            return Err(invalid());
        }

        if !self.users.mark_verified(user_id).await? {
            return Err(AppError::NotFound("User".to_string()));
        }
        info!(user_id = %user_id, "Email verified");
        Ok(())
    }

    /// Issue a fresh verification code for an unverified account. Unknown or
    /// already verified addresses succeed silently.
    pub async fn resend_verification(&self, email: &str) -> Result<(), AppError> {
        match self.users.find_by_email(email).await? {
            Some(user) if !user.is_verified => {
                self.send_verification_code(&user).await;
            }
            _ => {}
        }
        Ok(())
    }

    /// Redeem a refresh token for a new pair. Each refresh token works once.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let key = build_key(KeyPrefix::RefreshToken, [refresh_token]);
        let rejected = || AppError::Unauthenticated("Invalid refresh token".to_string());

        let user_id = match self.cache.get_and_delete(&key).await {
            Ok(value) => value.into_text()?,
            Err(CacheError::Miss) => return Err(rejected()),
            Err(e) => return Err(e.into()),
        };
        let user_id = Uuid::parse_str(&user_id).map_err(|_| rejected())?;

        let user = self.users.find_by_id(user_id).await?.ok_or_else(rejected)?;
        if !user.is_active {
            return Err(AppError::Forbidden("Account is disabled".to_string()));
        }

        self.issue_pair(user.id).await
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<User, AppError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    async fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, AppError> {
        let access_token = self.tokens.issue(&user_id.to_string())?;

        let refresh_token = hex::encode(rand::thread_rng().gen::<[u8; 32]>());
        let key = build_key(KeyPrefix::RefreshToken, [refresh_token.as_str()]);
        self.cache
            .set(&key, CacheValue::Text(user_id.to_string()), self.ttls.refresh_token)
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.ttl().as_secs(),
        })
    }

    async fn send_verification_code(&self, user: &User) {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        let key = build_key(KeyPrefix::EmailVerification, [user.id.to_string()]);

        if let Err(e) = self
            .cache
            .set(&key, CacheValue::Text(code.clone()), self.ttls.verification_code)
            .await
        {
            warn!(user_id = %user.id, error = %e, "Failed to store verification code");
            return;
        }

        let Some(publisher) = &self.notifications else {
            return;
        };
        let data = json!({
            "name": user.full_name,
            "code": code,
            "user_id": user.id,
            "expires_in_minutes": self.ttls.verification_code.as_secs() / 60,
        });
        if let Err(e) = publisher
            .notify(&user.email, "Verify your email address", VERIFY_EMAIL_TEMPLATE, data)
            .await
        {
            warn!(user_id = %user.id, error = %e, "Failed to queue verification email");
        }
    }
}

#[async_trait]
impl UserDirectory for UserService {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        self.users.find_by_id(user_id).await
    }
}
