// Bearer token signing and verification (HS256 JWT)

use crate::core::errors::TokenError;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Default access token lifetime (24 hours)
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Clock abstraction for token time checks
///
/// Expiry is evaluated by the service rather than by `jsonwebtoken`, so tests
/// can pin the current time.
pub trait TokenClock: Send + Sync {
    fn now_epoch_secs(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TokenClock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Fixed clock for deterministic tests
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl TokenClock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0
    }
}

/// Signs and verifies bearer tokens. Stateless: there is no revocation list.
pub struct TokenService {
    secret: SecretString,
    ttl: Duration,
    clock: Arc<dyn TokenClock>,
}

impl TokenService {
    /// Create a token service using the system clock
    pub fn new(secret: &str, ttl: Duration) -> Result<Self, TokenError> {
        Self::with_clock(secret, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(secret: &str, ttl: Duration, clock: Arc<dyn TokenClock>) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::Signing("signing secret must not be empty".to_string()));
        }
        Ok(Self {
            secret: SecretString::new(secret.to_string()),
            ttl,
            clock,
        })
    }

    /// Token lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a signed token for `subject_id` with iat = now and exp = now + ttl
    pub fn issue(&self, subject_id: &str) -> Result<String, TokenError> {
        let now = self.clock.now_epoch_secs();
        let claims = Claims {
            sub: subject_id.to_string(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.expose_secret().as_bytes()),
        )
        .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify a token and return its subject
    ///
    /// Signature and algorithm are checked first. Only a token that verifies can
    /// be reported as `Expired`.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        let claims = self.verify_claims(token)?;
        Ok(claims.sub)
    }

    /// Verify a token and return all of its claims
    pub fn verify_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims = HashSet::from(["exp".to_string(), "sub".to_string()]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.expose_secret().as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                TokenError::InvalidSignature
            }
            _ => TokenError::Malformed(e.to_string()),
        })?;

        let claims = data.claims;
        if self.clock.now_epoch_secs() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}
