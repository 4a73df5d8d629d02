//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::error::AppError;
use crate::refund::{RefundPolicy, DEFAULT_FULL_REFUND_DAYS, DEFAULT_HALF_REFUND_DAYS};

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub refund: RefundConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Comma separated list of allowed CORS origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_cors_origins() -> String {
    "http://localhost:3000,http://127.0.0.1:3000".to_string()
}

/// Where reservations are stored
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process-local store, lost on restart
    Memory,
}

/// Storage selection
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Apply embedded migrations at startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_run_migrations() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            run_migrations: default_run_migrations(),
        }
    }
}

/// Authentication configuration
///
/// Tokens are issued by the hosted auth provider and signed with a shared
/// HS256 secret.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// JWT signing secret
    pub jwt_secret: String,

    /// Expected `aud` claim, if the provider sets one
    pub audience: Option<String>,

    /// Lifetime of tokens minted by this service (tests and tooling)
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_secs: i64,
}

fn default_jwt_expiration() -> i64 {
    3600
}

/// Payment provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    /// Stripe secret key
    pub stripe_secret_key: String,

    /// API base URL
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_payments_timeout")]
    pub timeout_ms: u64,

    /// Pull the host's share back from the connected account on refund
    #[serde(default = "default_true")]
    pub reverse_transfer: bool,

    /// Give the platform fee back on refund
    #[serde(default = "default_true")]
    pub refund_application_fee: bool,
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_payments_timeout() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

/// Refund tier configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RefundConfig {
    /// Days before arrival at which the 50% tier starts
    #[serde(default = "default_full_refund_days")]
    pub full_refund_days_before: i64,

    /// Days before arrival at which the 0% tier starts
    #[serde(default = "default_half_refund_days")]
    pub half_refund_days_before: i64,

    /// IANA timezone used to compare dates
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_full_refund_days() -> i64 {
    DEFAULT_FULL_REFUND_DAYS
}

fn default_half_refund_days() -> i64 {
    DEFAULT_HALF_REFUND_DAYS
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for RefundConfig {
    fn default() -> Self {
        Self {
            full_refund_days_before: DEFAULT_FULL_REFUND_DAYS,
            half_refund_days_before: DEFAULT_HALF_REFUND_DAYS,
            timezone: default_timezone(),
        }
    }
}

impl RefundConfig {
    /// Build the refund policy
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unknown timezone or negative offsets
    pub fn policy(&self) -> Result<RefundPolicy, AppError> {
        let tz = self
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| AppError::Config(format!("refund.timezone: {}", e)))?;

        if self.full_refund_days_before < 0 || self.half_refund_days_before < 0 {
            return Err(AppError::Config(
                "refund day offsets must not be negative".to_string(),
            ));
        }

        Ok(RefundPolicy::new(
            self.full_refund_days_before,
            self.half_refund_days_before,
            tz,
        ))
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("database.max_connections", 10)?
            .set_default("auth.jwt_expiration_secs", 3600)?
            .set_default("payments.api_base", "https://api.stripe.com")?
            .set_default("payments.timeout_ms", 10_000)?
            .set_default("refund.full_refund_days_before", DEFAULT_FULL_REFUND_DAYS)?
            .set_default("refund.half_refund_days_before", DEFAULT_HALF_REFUND_DAYS)?
            .set_default("refund.timezone", "UTC")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with SUBLET_ prefix
            .add_source(
                Environment::with_prefix("SUBLET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("SUBLET").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_default_refund_config() {
        let config = RefundConfig::default();
        assert_eq!(config.full_refund_days_before, 6);
        assert_eq!(config.half_refund_days_before, 2);
        assert_eq!(config.policy().unwrap(), RefundPolicy::default());
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let config = RefundConfig {
            timezone: "Mars/Olympus".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.policy(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_deserialize_from_toml() {
        let raw = r#"
            [server]
            port = 9100

            [storage]
            backend = "memory"

            [auth]
            jwt_secret = "secret"

            [payments]
            stripe_secret_key = "sk_test_123"

            [refund]
            timezone = "Europe/Paris"
        "#;

        let config: AppConfig = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.payments.reverse_transfer);
        assert_eq!(config.payments.api_base, "https://api.stripe.com");
        assert_eq!(config.refund.full_refund_days_before, 6);
        assert_eq!(
            config.refund.policy().unwrap().timezone(),
            chrono_tz::Europe::Paris
        );
    }
}
