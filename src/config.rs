//! Server configuration module
//! Handles runtime configuration for the realtime chat server

use crate::constants::{
    DEFAULT_CONNECTION_QUEUE, DEFAULT_EDIT_WINDOW_SECS, DEFAULT_HOST, DEFAULT_NOTIFY_ATTEMPTS,
    DEFAULT_NOTIFY_QUEUE, DEFAULT_NOTIFY_WORKERS, DEFAULT_PORT, DEFAULT_SESSION_IDLE_HOURS,
    DEFAULT_TOKEN_TTL_HOURS,
};
use crate::error::{Result, RustyChatError};
use std::env;
use std::str::FromStr;

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JWT secret for access token signing/validation
    pub jwt_secret: String,
    /// Shared key the external credential verifier presents on /internal/sessions
    pub service_key: String,
    /// Lifetime of issued access tokens
    pub token_ttl_hours: i64,
    /// Sessions idle for longer than this are treated as expired
    pub session_idle_hours: i64,
    /// Messages can be edited this many seconds after creation
    pub edit_window_secs: i64,
    /// Bounded outbound queue per connection
    pub connection_queue: usize,
    /// Offline notification queue capacity
    pub notify_queue: usize,
    pub notify_workers: usize,
    pub notify_attempts: u32,
    pub enable_tls: bool,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

impl ServerConfig {
    /// Deterministic configuration for tests. Never use these secrets in production.
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            jwt_secret: "test-jwt-secret-only-for-unit-tests-never-use-in-production".to_string(),
            service_key: "test-service-key-only-for-unit-tests".to_string(),
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            session_idle_hours: DEFAULT_SESSION_IDLE_HOURS,
            edit_window_secs: DEFAULT_EDIT_WINDOW_SECS,
            connection_queue: 32,
            notify_queue: 64,
            notify_workers: 2,
            notify_attempts: DEFAULT_NOTIFY_ATTEMPTS,
            enable_tls: false,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }

    /// Validate that a secret meets security requirements
    fn validate_secret(secret: &str, secret_type: &str) -> Result<()> {
        if secret.len() < 32 {
            return Err(RustyChatError::ConfigError(format!(
                "{} must be at least 32 characters long",
                secret_type
            )));
        }

        let insecure_patterns = ["your-secret-key", "change-this", "changeme", "default", "password", "12345"];
        for pattern in &insecure_patterns {
            if secret.to_lowercase().contains(pattern) {
                return Err(RustyChatError::ConfigError(format!(
                    "{} contains insecure pattern '{}'. Generate one with: openssl rand -base64 32",
                    secret_type, pattern
                )));
            }
        }

        if secret.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RustyChatError::ConfigError(format!(
                "{} should contain mixed characters (letters, numbers, symbols)",
                secret_type
            )));
        }

        Ok(())
    }

    /// Check the secrets and numeric bounds of a loaded configuration
    pub fn validate(&self) -> Result<()> {
        Self::validate_secret(&self.jwt_secret, "JWT secret")?;
        Self::validate_secret(&self.service_key, "Service key")?;
        if self.jwt_secret == self.service_key {
            return Err(RustyChatError::ConfigError(
                "JWT secret and service key must be different".to_string(),
            ));
        }
        if self.connection_queue == 0 || self.notify_queue == 0 || self.notify_workers == 0 {
            return Err(RustyChatError::ConfigError(
                "queue capacities and worker counts must be greater than zero".to_string(),
            ));
        }
        if self.edit_window_secs < 0 || self.token_ttl_hours <= 0 || self.session_idle_hours <= 0 {
            return Err(RustyChatError::ConfigError(
                "time windows must be positive".to_string(),
            ));
        }
        if self.enable_tls {
            match (&self.tls_cert_path, &self.tls_key_path) {
                (Some(cert), Some(key)) => {
                    if !std::path::Path::new(cert).exists() {
                        return Err(RustyChatError::ConfigError(format!(
                            "TLS certificate file does not exist: {}",
                            cert
                        )));
                    }
                    if !std::path::Path::new(key).exists() {
                        return Err(RustyChatError::ConfigError(format!(
                            "TLS private key file does not exist: {}",
                            key
                        )));
                    }
                }
                _ => {
                    return Err(RustyChatError::ConfigError(
                        "TLS is enabled but RUSTY_CHAT_TLS_CERT_PATH or RUSTY_CHAT_TLS_KEY_PATH is not set"
                            .to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("RUSTY_CHAT_JWT_SECRET").map_err(|_| {
            RustyChatError::ConfigError(
                "RUSTY_CHAT_JWT_SECRET environment variable is required. \
                 Generate one with: openssl rand -base64 32"
                    .to_string(),
            )
        })?;
        let service_key = env::var("RUSTY_CHAT_SERVICE_KEY").map_err(|_| {
            RustyChatError::ConfigError(
                "RUSTY_CHAT_SERVICE_KEY environment variable is required".to_string(),
            )
        })?;

        let config = Self {
            host: env::var("RUSTY_CHAT_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: env_or("RUSTY_CHAT_PORT", DEFAULT_PORT),
            jwt_secret,
            service_key,
            token_ttl_hours: env_or("RUSTY_CHAT_TOKEN_TTL_HOURS", DEFAULT_TOKEN_TTL_HOURS),
            session_idle_hours: env_or("RUSTY_CHAT_SESSION_IDLE_HOURS", DEFAULT_SESSION_IDLE_HOURS),
            edit_window_secs: env_or("RUSTY_CHAT_EDIT_WINDOW_SECS", DEFAULT_EDIT_WINDOW_SECS),
            connection_queue: env_or("RUSTY_CHAT_CONN_QUEUE", DEFAULT_CONNECTION_QUEUE),
            notify_queue: env_or("RUSTY_CHAT_NOTIFY_QUEUE", DEFAULT_NOTIFY_QUEUE),
            notify_workers: env_or("RUSTY_CHAT_NOTIFY_WORKERS", DEFAULT_NOTIFY_WORKERS),
            notify_attempts: env_or("RUSTY_CHAT_NOTIFY_ATTEMPTS", DEFAULT_NOTIFY_ATTEMPTS),
            enable_tls: env::var("RUSTY_CHAT_ENABLE_TLS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
            tls_cert_path: env::var("RUSTY_CHAT_TLS_CERT_PATH").ok(),
            tls_key_path: env::var("RUSTY_CHAT_TLS_KEY_PATH").ok(),
        };

        config.validate()?;
        Ok(config)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
