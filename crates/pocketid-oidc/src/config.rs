//! Authorization-server configuration.
//!
//! All lifetimes are humantime strings in files and environment overrides
//! (`"15m"`, `"5s"`). The operator encryption secret is deliberately absent:
//! it is handed to [`crate::crypto::kek`] directly and never serialized.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{AuthError, AuthResult};

/// Default configuration file looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "pocketid.toml";

/// Prefix for environment overrides, e.g. `POCKETID__TOKENS__ID_TOKEN_LIFETIME=30m`.
pub const ENV_PREFIX: &str = "POCKETID";

/// Longest accepted lifetime or interval (ten years).
pub const MAX_LIFETIME: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Root configuration.
///
/// # Example (TOML)
///
/// ```toml
/// app_url = "https://id.example.com"
/// instance_id = "4f1c2e0a-9b7d-4c55-8a51-2f0e7c0d9b11"
/// emails_verified = true
/// device_poll_interval = "5s"
///
/// [tokens]
/// signing_algorithm = "ES384"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Public base URL of the server; used for verification and picture URLs.
    pub app_url: String,

    /// `iss` claim of every token. Defaults to `app_url` when empty.
    pub issuer: String,

    /// Installation identifier mixed into every key-encryption key.
    pub instance_id: String,

    /// Server-wide policy: whether user emails count as verified.
    pub emails_verified: bool,

    /// Lifetime of an authorization code.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// Lifetime of a device code.
    #[serde(with = "humantime_serde")]
    pub device_code_lifetime: Duration,

    /// Minimum interval between device polls.
    #[serde(with = "humantime_serde")]
    pub device_poll_interval: Duration,

    /// Token minting configuration.
    pub tokens: TokenConfig,

    /// Data-layer configuration.
    pub storage: StorageConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            app_url: "http://localhost:1411".to_string(),
            issuer: String::new(),
            instance_id: String::new(),
            emails_verified: false,
            authorization_code_lifetime: Duration::from_secs(15 * 60),
            device_code_lifetime: Duration::from_secs(15 * 60),
            device_poll_interval: Duration::from_secs(5),
            tokens: TokenConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Token minting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_lifetime: Duration,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Algorithm used when a signing key has to be generated.
    /// Supported: "RS256", "ES384".
    pub signing_algorithm: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            id_token_lifetime: Duration::from_secs(3600),
            access_token_lifetime: Duration::from_secs(3600),
            signing_algorithm: "RS256".to_string(),
        }
    }
}

/// Data-layer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Deadline applied to every storage call made by the services.
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// PostgreSQL connection string, when the PostgreSQL backend is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Maximum pool size for the PostgreSQL backend.
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
            database_url: None,
            max_connections: 10,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,

    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or merged.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl OidcConfig {
    /// Loads configuration from an optional TOML file plus `POCKETID__*`
    /// environment overrides, then validates it.
    ///
    /// A `.env` file in the working directory is honoured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if the sources cannot be merged and any
    /// validation error from [`OidcConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut builder = Config::builder();
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            return Err(ConfigError::Load(format!(
                "config file not found: {}",
                file.display()
            )));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        );

        let merged: OidcConfig = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        merged.validate()?;
        Ok(merged)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - `app_url` is not an absolute http(s) URL
    /// - the signing algorithm is not supported
    /// - a lifetime or the poll interval is zero or above [`MAX_LIFETIME`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let app_url = url::Url::parse(&self.app_url)
            .map_err(|e| ConfigError::InvalidValue(format!("app_url: {e}")))?;
        if !matches!(app_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue(
                "app_url must use http or https".to_string(),
            ));
        }

        match self.tokens.signing_algorithm.as_str() {
            "RS256" | "ES384" => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid signing algorithm: '{}'. Must be RS256 or ES384",
                    other
                )));
            }
        }

        let lifetimes = [
            ("authorization_code_lifetime", self.authorization_code_lifetime),
            ("device_code_lifetime", self.device_code_lifetime),
            ("device_poll_interval", self.device_poll_interval),
            ("tokens.id_token_lifetime", self.tokens.id_token_lifetime),
            ("tokens.access_token_lifetime", self.tokens.access_token_lifetime),
            ("storage.operation_timeout", self.storage.operation_timeout),
        ];
        for (name, value) in lifetimes {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
            if value > MAX_LIFETIME {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must not exceed {}s",
                    MAX_LIFETIME.as_secs()
                )));
            }
        }

        Ok(())
    }

    /// Returns the issuer, falling back to `app_url`.
    #[must_use]
    pub fn issuer(&self) -> &str {
        if self.issuer.is_empty() {
            self.app_url.trim_end_matches('/')
        } else {
            &self.issuer
        }
    }

    /// Returns the instance ID, failing when it has not been provisioned.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` when `instance_id` is empty.
    pub fn require_instance_id(&self) -> Result<&str, ConfigError> {
        if self.instance_id.is_empty() {
            return Err(ConfigError::Missing("instance_id".to_string()));
        }
        Ok(&self.instance_id)
    }

    /// `app_url` without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.app_url.trim_end_matches('/')
    }
}

/// Converts a configured duration to whole seconds.
///
/// # Errors
///
/// Returns `Configuration` if the value does not fit an `i64`.
pub(crate) fn whole_seconds(name: &str, value: Duration) -> AuthResult<i64> {
    i64::try_from(value.as_secs())
        .map_err(|_| AuthError::configuration(format!("{name} is out of range")))
}

/// Returns `now + lifetime`.
///
/// # Errors
///
/// Returns `Configuration` if the sum leaves the representable date range.
pub(crate) fn expiry(
    now: OffsetDateTime,
    name: &str,
    lifetime: Duration,
) -> AuthResult<OffsetDateTime> {
    time::Duration::try_from(lifetime)
        .ok()
        .and_then(|lifetime| now.checked_add(lifetime))
        .ok_or_else(|| AuthError::configuration(format!("{name} is out of range")))
}
