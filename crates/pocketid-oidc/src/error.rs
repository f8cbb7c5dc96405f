//! Authorization-server error types.
//!
//! Every failure the core can surface is an [`AuthError`]. Variants map onto
//! the OAuth 2.0 / RFC 8628 error vocabulary through
//! [`AuthError::oauth_error_code`], and messages within a category are kept
//! identical so callers cannot use them to enumerate clients or codes.

use std::fmt;

use crate::crypto::CryptoError;
use crate::oauth::callback::CallbackError;
use crate::token::jwt::JwtError;

/// Message shared by every client authentication failure.
pub(crate) const INVALID_CLIENT_CREDENTIALS: &str = "invalid client credentials";

/// Message shared by every failed code redemption.
pub(crate) const INVALID_AUTHORIZATION_CODE: &str = "invalid authorization code";

/// Message shared by every failed device code lookup.
pub(crate) const INVALID_DEVICE_CODE: &str = "invalid device code";

/// Errors that can occur while issuing or redeeming grants.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request is missing a parameter or carries a malformed one.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The client is unknown or failed to authenticate.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The authorization code or device code is invalid, expired, or already used.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The grant type is not supported for this client.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The user is not allowed to authorize this client.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of why access was denied.
        message: String,
    },

    /// The device code has not been approved yet.
    #[error("Authorization pending")]
    AuthorizationPending,

    /// The client polled the token endpoint faster than the advertised interval.
    #[error("Slow down")]
    SlowDown,

    /// The device code has expired.
    #[error("Expired token: {message}")]
    ExpiredToken {
        /// Description of the expired artifact.
        message: String,
    },

    /// A data-layer call failed or timed out.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// An encryption, decryption, or signing primitive failed.
    #[error("Cryptographic failure")]
    Crypto,

    /// The server configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `ExpiredToken` error.
    #[must_use]
    pub fn expired_token(message: impl Into<String>) -> Self {
        Self::ExpiredToken {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The single error returned for unknown clients and bad secrets alike.
    #[must_use]
    pub fn bad_client_credentials() -> Self {
        Self::invalid_client(INVALID_CLIENT_CREDENTIALS)
    }

    /// The single error returned for every failed code redemption.
    #[must_use]
    pub fn bad_authorization_code() -> Self {
        Self::invalid_grant(INVALID_AUTHORIZATION_CODE)
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. }
                | Self::InvalidClient { .. }
                | Self::InvalidGrant { .. }
                | Self::UnsupportedGrantType { .. }
                | Self::AccessDenied { .. }
                | Self::AuthorizationPending
                | Self::SlowDown
                | Self::ExpiredToken { .. }
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Crypto | Self::Configuration { .. } | Self::Internal { .. }
        )
    }

    /// Returns `true` for the expected device polling states.
    ///
    /// These are answers, not failures: the client keeps polling.
    #[must_use]
    pub fn is_polling_state(&self) -> bool {
        matches!(self, Self::AuthorizationPending | Self::SlowDown)
    }

    /// Returns `true` if the caller may retry the same request unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. } => ErrorCategory::Validation,
            Self::UnsupportedGrantType { .. } => ErrorCategory::Validation,
            Self::InvalidClient { .. } => ErrorCategory::Authentication,
            Self::InvalidGrant { .. } => ErrorCategory::Authentication,
            Self::ExpiredToken { .. } => ErrorCategory::Authentication,
            Self::AccessDenied { .. } => ErrorCategory::Authorization,
            Self::AuthorizationPending => ErrorCategory::Polling,
            Self::SlowDown => ErrorCategory::Polling,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Crypto => ErrorCategory::Cryptography,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::AccessDenied { .. } => "access_denied",
            Self::AuthorizationPending => "authorization_pending",
            Self::SlowDown => "slow_down",
            Self::ExpiredToken { .. } => "expired_token",
            Self::Storage { .. } => "server_error",
            Self::Crypto => "server_error",
            Self::Configuration { .. } => "server_error",
            Self::Internal { .. } => "server_error",
        }
    }
}

impl From<CryptoError> for AuthError {
    fn from(err: CryptoError) -> Self {
        tracing::debug!(error = %err, "cryptographic operation failed");
        Self::Crypto
    }
}

impl From<CallbackError> for AuthError {
    fn from(err: CallbackError) -> Self {
        Self::invalid_request(err.to_string())
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::InvalidKey { message } => Self::configuration(message),
            other => {
                tracing::debug!(error = %other, "token signing operation failed");
                Self::Crypto
            }
        }
    }
}

impl From<crate::config::ConfigError> for AuthError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

/// Categories of errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Client or grant authentication failures.
    Authentication,
    /// Policy denials (group restrictions).
    Authorization,
    /// Request validation errors.
    Validation,
    /// Expected device polling states.
    Polling,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Encryption and signing failures.
    Cryptography,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Validation => write!(f, "validation"),
            Self::Polling => write!(f, "polling"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Cryptography => write!(f, "cryptography"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
