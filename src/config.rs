// Configuration management

use crate::core::errors::AppError;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const MIN_JWT_SECRET_LEN: usize = 32;

/// Where the cache and the message broker live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackend {
    Redis,
    /// In-process cache and broker; single instance, not durable
    Memory,
}

/// Application configuration loaded from environment variables
///
/// All configuration is validated on load with clear error messages.
#[derive(Debug, Clone)]
pub struct Config {
    // Server configuration
    pub bind_address: String,
    pub port: u16,

    // Cache and broker
    pub state_backend: StateBackend,
    pub redis_url: String,
    pub redis_connection_timeout_secs: u64,
    pub redis_operation_timeout_secs: u64,

    // Database configuration
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_min_connections: u32,
    pub database_acquire_timeout_secs: u64,

    // Tokens and credentials
    pub jwt_secret: SecretString,
    pub token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub verification_code_ttl_secs: u64,

    // Cache lifetimes
    pub entity_cache_ttl_secs: u64,
    pub list_cache_ttl_secs: u64,

    // Mail
    pub mail_relay_url: Option<String>,
    pub mail_from: String,
    pub template_dir: PathBuf,
    pub mail_timeout_secs: u64,

    // Queue consumers
    pub poison_warn_threshold: u32,
    pub consumer_poll_interval_ms: u64,
    pub queue_visibility_timeout_secs: u64,

    // Middleware configuration
    pub request_timeout_secs: u64,
    pub body_size_limit_bytes: usize,

    // Logging configuration
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Supports `.env` file loading in development (via dotenv crate).
    pub fn from_env() -> Result<Self, AppError> {
        // Skipped under test so a developer's .env cannot leak into assertions
        #[cfg(not(test))]
        {
            dotenv::dotenv().ok();
        }

        let redis_url = Self::get_env_or_default("REDIS_URL", "redis://localhost:6379/0");

        let config = Self {
            bind_address: Self::get_env_or_default("BIND_ADDRESS", "0.0.0.0"),
            port: Self::parse_port()?,
            state_backend: Self::parse_state_backend()?,
            redis_connection_timeout_secs: Self::detect_redis_connection_timeout(&redis_url)?,
            redis_url,
            redis_operation_timeout_secs: Self::parse_u64_or_default("REDIS_OPERATION_TIMEOUT_SECS", 2)?,
            database_url: Self::get_required_env("DATABASE_URL")?,
            database_max_connections: Self::parse_u32_or_default("DATABASE_MAX_CONNECTIONS", 10)?,
            database_min_connections: Self::parse_u32_or_default("DATABASE_MIN_CONNECTIONS", 1)?,
            database_acquire_timeout_secs: Self::parse_u64_or_default("DATABASE_ACQUIRE_TIMEOUT_SECS", 5)?,
            jwt_secret: SecretString::new(Self::get_required_env("JWT_SECRET")?),
            token_ttl_secs: Self::parse_u64_or_default("TOKEN_TTL_SECS", 24 * 3600)?,
            refresh_token_ttl_secs: Self::parse_u64_or_default("REFRESH_TOKEN_TTL_SECS", 7 * 24 * 3600)?,
            verification_code_ttl_secs: Self::parse_u64_or_default("VERIFICATION_CODE_TTL_SECS", 15 * 60)?,
            entity_cache_ttl_secs: Self::parse_u64_or_default("ENTITY_CACHE_TTL_SECS", 600)?,
            list_cache_ttl_secs: Self::parse_u64_or_default("LIST_CACHE_TTL_SECS", 120)?,
            mail_relay_url: Self::get_optional_env("MAIL_RELAY_URL"),
            mail_from: Self::get_env_or_default("MAIL_FROM", "no-reply@business-hub.local"),
            template_dir: PathBuf::from(Self::get_env_or_default("TEMPLATE_DIR", "templates")),
            mail_timeout_secs: Self::parse_u64_or_default("MAIL_TIMEOUT_SECS", 10)?,
            poison_warn_threshold: Self::parse_u32_or_default("POISON_WARN_THRESHOLD", 10)?,
            consumer_poll_interval_ms: Self::parse_u64_or_default("CONSUMER_POLL_INTERVAL_MS", 1000)?,
            queue_visibility_timeout_secs: Self::parse_u64_or_default("QUEUE_VISIBILITY_TIMEOUT_SECS", 60)?,
            request_timeout_secs: Self::parse_u64_or_default("REQUEST_TIMEOUT_SECS", 30)?,
            body_size_limit_bytes: Self::parse_usize_or_default("BODY_SIZE_LIMIT_BYTES", 1024 * 1024)?,
            log_level: Self::get_env_or_default("LOG_LEVEL", "info"),
            log_format: Self::get_env_or_default("LOG_FORMAT", "json"),
        };

        config.validate()?;

        Ok(config)
    }

    fn get_env_or_default(key: &str, default: &str) -> String {
        env::var(key).unwrap_or_else(|_| default.to_string())
    }

    fn get_optional_env(key: &str) -> Option<String> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    fn get_required_env(key: &str) -> Result<String, AppError> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => Ok(value),
            Ok(_) => Err(AppError::Configuration(format!("{} is empty", key))),
            Err(_) => Err(AppError::Configuration(format!("{} not set", key))),
        }
    }

    fn parse_port() -> Result<u16, AppError> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "8000".to_string());
        let port = port_str
            .parse::<u16>()
            .map_err(|e| AppError::Configuration(format!("Invalid PORT value '{}': {}", port_str, e)))?;

        if port == 0 {
            return Err(AppError::Configuration("PORT must be between 1 and 65535".to_string()));
        }

        Ok(port)
    }

    fn parse_state_backend() -> Result<StateBackend, AppError> {
        match Self::get_env_or_default("STATE_BACKEND", "redis").to_lowercase().as_str() {
            "redis" => Ok(StateBackend::Redis),
            "memory" => Ok(StateBackend::Memory),
            other => Err(AppError::Configuration(format!(
                "Invalid STATE_BACKEND '{}': must be 'redis' or 'memory'",
                other
            ))),
        }
    }

    /// Parse a positive integer from the environment or return the default
    fn parse_positive<T>(key: &str, default: T) -> Result<T, AppError>
    where
        T: std::str::FromStr + PartialEq + Default,
        T::Err: std::fmt::Display,
    {
        match env::var(key) {
            Ok(value) => {
                let parsed = value
                    .parse::<T>()
                    .map_err(|e| AppError::Configuration(format!("Invalid {} value '{}': {}", key, value, e)))?;

                if parsed == T::default() {
                    return Err(AppError::Configuration(format!("{} must be greater than 0", key)));
                }

                Ok(parsed)
            }
            _ => Ok(default),
        }
    }

    fn parse_u64_or_default(key: &str, default: u64) -> Result<u64, AppError> {
        Self::parse_positive(key, default)
    }

    fn parse_u32_or_default(key: &str, default: u32) -> Result<u32, AppError> {
        Self::parse_positive(key, default)
    }

    fn parse_usize_or_default(key: &str, default: usize) -> Result<usize, AppError> {
        Self::parse_positive(key, default)
    }

    /// Detect Redis connection timeout based on environment
    ///
    /// Localhost connections get 15 seconds (port forwarding under WSL can be
    /// slow on first connect), everything else 5. Overridden by
    /// `REDIS_CONNECTION_TIMEOUT_SECS`.
    fn detect_redis_connection_timeout(redis_url: &str) -> Result<u64, AppError> {
        if env::var("REDIS_CONNECTION_TIMEOUT_SECS").is_ok() {
            return Self::parse_u64_or_default("REDIS_CONNECTION_TIMEOUT_SECS", 5);
        }

        let is_localhost = redis_url.contains("localhost") || redis_url.contains("127.0.0.1");
        Ok(if is_localhost { 15 } else { 5 })
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), AppError> {
        if self.state_backend == StateBackend::Redis {
            Self::validate_url(&self.redis_url, "Redis")?;
        }
        Self::validate_url(&self.database_url, "Database")?;
        if let Some(ref url) = self.mail_relay_url {
            Self::validate_url(url, "Mail relay")?;
        }

        if self.jwt_secret.expose_secret().len() < MIN_JWT_SECRET_LEN {
            return Err(AppError::Configuration(format!(
                "JWT_SECRET must be at least {} bytes",
                MIN_JWT_SECRET_LEN
            )));
        }

        if self.database_min_connections > self.database_max_connections {
            return Err(AppError::Configuration(format!(
                "DATABASE_MIN_CONNECTIONS ({}) exceeds DATABASE_MAX_CONNECTIONS ({})",
                self.database_min_connections, self.database_max_connections
            )));
        }

        if !self.mail_from.contains('@') {
            return Err(AppError::Configuration(format!(
                "Invalid MAIL_FROM '{}': must be an email address",
                self.mail_from
            )));
        }

        Self::validate_log_level(&self.log_level)?;
        Self::validate_log_format(&self.log_format)?;

        Ok(())
    }

    fn validate_url(url: &str, description: &str) -> Result<(), AppError> {
        url::Url::parse(url)
            .map_err(|e| AppError::Configuration(format!("Invalid {} URL '{}': {}", description, url, e)))?;
        Ok(())
    }

    fn validate_log_level(level: &str) -> Result<(), AppError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(AppError::Configuration(format!(
                "Invalid LOG_LEVEL '{}': must be one of {}",
                level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }

    fn validate_log_format(format: &str) -> Result<(), AppError> {
        if format != "json" && format != "text" {
            return Err(AppError::Configuration(format!(
                "Invalid LOG_FORMAT '{}': must be 'json' or 'text'",
                format
            )));
        }
        Ok(())
    }

    pub fn redis_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.redis_connection_timeout_secs)
    }

    pub fn redis_operation_timeout(&self) -> Duration {
        Duration::from_secs(self.redis_operation_timeout_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl Config {
    /// Configuration for tests: no environment access, in-memory state
    pub fn test_config() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8000,
            state_backend: StateBackend::Memory,
            redis_url: "redis://localhost:6379/0".to_string(),
            redis_connection_timeout_secs: 15,
            redis_operation_timeout_secs: 2,
            database_url: "postgresql://localhost/business_hub_test".to_string(),
            database_max_connections: 5,
            database_min_connections: 1,
            database_acquire_timeout_secs: 5,
            jwt_secret: SecretString::new("test-secret-that-is-long-enough-for-hs256".to_string()),
            token_ttl_secs: 3600,
            refresh_token_ttl_secs: 7 * 24 * 3600,
            verification_code_ttl_secs: 900,
            entity_cache_ttl_secs: 600,
            list_cache_ttl_secs: 120,
            mail_relay_url: None,
            mail_from: "no-reply@example.com".to_string(),
            template_dir: PathBuf::from("templates"),
            mail_timeout_secs: 10,
            poison_warn_threshold: 10,
            consumer_poll_interval_ms: 50,
            queue_visibility_timeout_secs: 60,
            request_timeout_secs: 30,
            body_size_limit_bytes: 1024 * 1024,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}
