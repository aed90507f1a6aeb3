//! Server configuration module.
//!
//! Parses configuration from environment variables for the Cash Delhi server
//! and the seed binary. Both binaries load a `.env` file first if present.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PORT` | No | 8080 | HTTP server port |
//! | `DATABASE_URL` | No | `sqlite://cashdelhi.db?mode=rwc` | SQLite connection URL |
//! | `CASHDELHI_DB_MAX_CONNECTIONS` | No | 5 | Connection pool size |
//! | `CASHDELHI_SESSION_STORE` | No | `database` | `database` or `memory` |
//! | `CASHDELHI_SESSION_TTL_SECS` | No | 86400 | Session and cookie lifetime |
//! | `CASHDELHI_SESSION_CLEANUP_SECS` | No | 3600 | Expired session sweep interval |
//! | `CASHDELHI_COOKIE_SECURE` | No | false | Mark the session cookie `Secure` |
//! | `CASHDELHI_ADMIN_USERNAME` | Seed only | `admin` | Admin account name |
//! | `CASHDELHI_ADMIN_PASSWORD` | Seed only | - | Admin account password |

use std::env;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use zeroize::Zeroizing;

use crate::session::{SessionBackend, SessionStoreConfig, DEFAULT_TTL_SECS};

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Default database location, created on first start.
const DEFAULT_DATABASE_URL: &str = "sqlite://cashdelhi.db?mode=rwc";

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

const DEFAULT_SESSION_CLEANUP_SECS: u64 = 3600;

/// Upper bound on the session lifetime (one year).
const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

const DEFAULT_ADMIN_USERNAME: &str = "admin";

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// sqlx SQLite URL.
    pub database_url: String,

    /// Maximum pooled connections (ignored for in-memory databases).
    pub db_max_connections: u32,

    /// Where session records are kept.
    pub session_backend: SessionBackend,

    /// Session and cookie lifetime.
    pub session_ttl: Duration,

    /// How often expired sessions are swept.
    pub session_cleanup_interval: Duration,

    /// When true, the session cookie carries the `Secure` attribute.
    pub cookie_secure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            session_backend: SessionBackend::Database,
            session_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            session_cleanup_interval: Duration::from_secs(DEFAULT_SESSION_CLEANUP_SECS),
            cookie_secure: false,
        }
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Environment variables have invalid format
    /// - Port number is not a valid u16
    /// - The session TTL or cleanup interval is out of range
    ///
    /// # Example
    ///
    /// ```no_run
    /// use cashdelhi_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_port()?;
        let database_url = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => DEFAULT_DATABASE_URL.to_string(),
        };
        let db_max_connections = parse_u64_env(
            "CASHDELHI_DB_MAX_CONNECTIONS",
            u64::from(DEFAULT_DB_MAX_CONNECTIONS),
        )?;
        let session_backend = parse_session_backend()?;
        let session_ttl = parse_u64_env("CASHDELHI_SESSION_TTL_SECS", DEFAULT_TTL_SECS)?;
        let session_cleanup =
            parse_u64_env("CASHDELHI_SESSION_CLEANUP_SECS", DEFAULT_SESSION_CLEANUP_SECS)?;
        let cookie_secure = parse_bool_env("CASHDELHI_COOKIE_SECURE");

        let config = Self {
            port,
            database_url,
            db_max_connections: u32::try_from(db_max_connections).map_err(|_| {
                ConfigError::InvalidFormat {
                    var: "CASHDELHI_DB_MAX_CONNECTIONS".to_string(),
                    message: "value too large".to_string(),
                }
            })?,
            session_backend,
            session_ttl: Duration::from_secs(session_ttl),
            session_cleanup_interval: Duration::from_secs(session_cleanup),
            cookie_secure,
        };

        config.validate()?;

        if config.session_backend == SessionBackend::Memory {
            warn!(
                "CASHDELHI_SESSION_STORE=memory - sessions are lost on restart \
                 and not shared between processes"
            );
        }

        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.db_max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "CASHDELHI_DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        let ttl = self.session_ttl.as_secs();
        if ttl == 0 || ttl > MAX_SESSION_TTL_SECS {
            return Err(ConfigError::ValidationError(format!(
                "CASHDELHI_SESSION_TTL_SECS must be between 1 and {MAX_SESSION_TTL_SECS}"
            )));
        }

        if self.session_cleanup_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "CASHDELHI_SESSION_CLEANUP_SECS must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Session store settings derived from this configuration.
    pub fn session_store_config(&self) -> SessionStoreConfig {
        SessionStoreConfig {
            ttl: self.session_ttl,
            ..SessionStoreConfig::default()
        }
    }
}

/// Settings for the `cashdelhi-seed` binary.
pub struct SeedConfig {
    pub database_url: String,
    pub admin_username: String,
    pub admin_password: Zeroizing<String>,
}

impl std::fmt::Debug for SeedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedConfig")
            .field("database_url", &self.database_url)
            .field("admin_username", &self.admin_username)
            .field("admin_password", &"<redacted>")
            .finish()
    }
}

impl SeedConfig {
    /// Parse seed settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if `CASHDELHI_ADMIN_PASSWORD`
    /// is unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => DEFAULT_DATABASE_URL.to_string(),
        };

        let admin_username = match env::var("CASHDELHI_ADMIN_USERNAME") {
            Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => DEFAULT_ADMIN_USERNAME.to_string(),
        };

        let admin_password = match env::var("CASHDELHI_ADMIN_PASSWORD") {
            Ok(password) if !password.is_empty() => Zeroizing::new(password),
            _ => {
                return Err(ConfigError::MissingEnvVar(
                    "CASHDELHI_ADMIN_PASSWORD".to_string(),
                ))
            }
        };

        Ok(Self {
            database_url,
            admin_username,
            admin_password,
        })
    }
}

/// Parse a boolean environment variable.
///
/// Returns `true` if the variable is set to "true" (case-insensitive),
/// `false` otherwise.
fn parse_bool_env(name: &str) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse an unsigned integer environment variable, falling back to `default`.
fn parse_u64_env(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidFormat {
                var: name.to_string(),
                message: format!("expected a non-negative integer, got '{value}'"),
            }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse the CASHDELHI_SESSION_STORE environment variable.
fn parse_session_backend() -> Result<SessionBackend, ConfigError> {
    let value = match env::var("CASHDELHI_SESSION_STORE") {
        Ok(s) if !s.trim().is_empty() => s,
        _ => return Ok(SessionBackend::Database),
    };

    match value.trim().to_ascii_lowercase().as_str() {
        "database" | "db" => Ok(SessionBackend::Database),
        "memory" => Ok(SessionBackend::Memory),
        other => Err(ConfigError::InvalidFormat {
            var: "CASHDELHI_SESSION_STORE".to_string(),
            message: format!("expected 'database' or 'memory', got '{other}'"),
        }),
    }
}
