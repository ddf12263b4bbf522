//! Configuration management for the authentication server
//!
//! This module handles loading and validating configuration from environment variables,
//! with support for different environments (development, staging, production).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use rand::RngCore;
use thiserror::Error;

/// Minimum session secret length accepted in production
const MIN_PRODUCTION_SECRET_LEN: usize = 32;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),
}

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse environment from string
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }

    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Get the environment name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Which key-value backend holds nonces and revocations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis { url: String },
}

/// Where the session signing secret came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    /// Read from `SESSION_SECRET`
    Configured,
    /// Generated at startup; sessions do not survive a restart
    Ephemeral,
}

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// Current environment
    pub environment: Environment,

    /// Server port
    pub port: u16,

    /// Log level (RUST_LOG)
    pub log_level: String,

    /// CORS allowed origins
    pub cors_allowed_origins: Option<String>,

    /// HMAC secret for session token signing
    pub session_secret: String,

    pub session_secret_source: SecretSource,

    /// Session token lifetime (default: 2 hours)
    pub session_ttl: Duration,

    pub session_issuer: String,

    pub session_audience: String,

    /// Upper bound on how long a revocation record is kept
    pub revocation_max_ttl: Duration,

    /// Nonce expiry window (default: 10 minutes)
    pub nonce_ttl: Duration,

    /// Interval of the background nonce sweep (default: 5 minutes)
    pub nonce_sweep_interval: Duration,

    /// Maximum number of tracked nonces
    pub nonce_max_entries: usize,

    pub store_backend: StoreBackend,

    /// Bound on each networked store operation
    pub store_timeout: Duration,

    /// Domain that sign-in messages must name, if set
    pub siwe_domain: Option<String>,

    /// Expose the nonce statistics endpoint
    pub nonce_stats_enabled: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("port", &self.port)
            .field("session_secret", &"****")
            .field("session_secret_source", &self.session_secret_source)
            .field("session_ttl", &self.session_ttl)
            .field("nonce_ttl", &self.nonce_ttl)
            .field("nonce_max_entries", &self.nonce_max_entries)
            .field("store_backend", &self.store_backend_name())
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    /// Development defaults with a fresh ephemeral secret
    fn default() -> Self {
        let session_ttl = Duration::from_secs(7200);
        Config {
            environment: Environment::Development,
            port: 3001,
            log_level: "info".to_string(),
            cors_allowed_origins: None,
            session_secret: generate_ephemeral_secret(),
            session_secret_source: SecretSource::Ephemeral,
            session_ttl,
            session_issuer: "vaultdash".to_string(),
            session_audience: "vaultdash-dashboard".to_string(),
            revocation_max_ttl: session_ttl,
            nonce_ttl: Duration::from_secs(600),
            nonce_sweep_interval: Duration::from_secs(300),
            nonce_max_entries: 10_000,
            store_backend: StoreBackend::Memory,
            store_timeout: Duration::from_millis(500),
            siwe_domain: None,
            nonce_stats_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT")
            .map(|s| Environment::from_str(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let port = lookup("PORT")
            .unwrap_or_else(|| "3001".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let log_level = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS");

        let (session_secret, session_secret_source) =
            resolve_session_secret(environment, lookup("SESSION_SECRET"))?;

        let session_ttl = Duration::from_secs(parse_or(&lookup, "SESSION_TTL_SECONDS", 7200)?);
        if session_ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "SESSION_TTL_SECONDS must be positive".to_string(),
            ));
        }

        let session_issuer = lookup("SESSION_ISSUER").unwrap_or_else(|| "vaultdash".to_string());
        let session_audience =
            lookup("SESSION_AUDIENCE").unwrap_or_else(|| "vaultdash-dashboard".to_string());

        let revocation_max_ttl = Duration::from_secs(parse_or(
            &lookup,
            "REVOCATION_MAX_TTL_SECONDS",
            session_ttl.as_secs(),
        )?);
        // A shorter record would lapse while a logged-out token is still valid
        if revocation_max_ttl < session_ttl {
            return Err(ConfigError::InvalidValue(format!(
                "REVOCATION_MAX_TTL_SECONDS ({}) must be at least SESSION_TTL_SECONDS ({})",
                revocation_max_ttl.as_secs(),
                session_ttl.as_secs()
            )));
        }

        let nonce_ttl = Duration::from_secs(parse_or(&lookup, "NONCE_TTL_SECONDS", 600)?);
        let nonce_sweep_interval =
            Duration::from_secs(parse_or(&lookup, "NONCE_SWEEP_INTERVAL_SECONDS", 300)?);
        if nonce_ttl.is_zero() || nonce_sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "Nonce TTL and sweep interval must be positive".to_string(),
            ));
        }

        let nonce_max_entries = parse_or(&lookup, "NONCE_MAX_ENTRIES", 10_000)?;
        if nonce_max_entries == 0 {
            return Err(ConfigError::InvalidValue(
                "NONCE_MAX_ENTRIES must be positive".to_string(),
            ));
        }

        let store_backend = match lookup("STORE_BACKEND")
            .unwrap_or_else(|| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "redis" => StoreBackend::Redis {
                url: lookup("REDIS_URL")
                    .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?,
            },
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid STORE_BACKEND: '{}'. Expected: memory or redis",
                    other
                )))
            }
        };

        let store_timeout = Duration::from_millis(parse_or(&lookup, "STORE_TIMEOUT_MS", 500)?);

        let siwe_domain = lookup("SIWE_DOMAIN").filter(|d| !d.trim().is_empty());

        let nonce_stats_enabled = match lookup("NONCE_STATS_ENABLED") {
            Some(v) => parse_bool(&v)?,
            None => !environment.is_production(),
        };

        Ok(Config {
            environment,
            port,
            log_level,
            cors_allowed_origins,
            session_secret,
            session_secret_source,
            session_ttl,
            session_issuer,
            session_audience,
            revocation_max_ttl,
            nonce_ttl,
            nonce_sweep_interval,
            nonce_max_entries,
            store_backend,
            store_timeout,
            siwe_domain,
            nonce_stats_enabled,
        })
    }

    /// Backend name for logging
    pub fn store_backend_name(&self) -> &'static str {
        match self.store_backend {
            StoreBackend::Memory => "memory",
            StoreBackend::Redis { .. } => "redis",
        }
    }
}

/// Production must be configured with a strong secret; other environments fall
/// back to a per-process random one.
fn resolve_session_secret(
    environment: Environment,
    configured: Option<String>,
) -> Result<(String, SecretSource), ConfigError> {
    match configured.filter(|s| !s.is_empty()) {
        Some(secret) => {
            if environment.is_production() && secret.len() < MIN_PRODUCTION_SECRET_LEN {
                return Err(ConfigError::InvalidValue(format!(
                    "SESSION_SECRET must be at least {} bytes in production",
                    MIN_PRODUCTION_SECRET_LEN
                )));
            }
            Ok((secret, SecretSource::Configured))
        }
        None if environment.is_production() => {
            Err(ConfigError::MissingEnvVar("SESSION_SECRET".to_string()))
        }
        None => Ok((generate_ephemeral_secret(), SecretSource::Ephemeral)),
    }
}

fn generate_ephemeral_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(format!("{} must be a number, got '{}'", key, raw))),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(format!(
            "Expected a boolean, got '{}'",
            raw
        ))),
    }
}
