//! # pocketid-oidc
//!
//! Authorization-server core of an OpenID Connect identity provider.
//!
//! User verification (passkeys, LDAP, ...) happens elsewhere; this crate takes
//! an authenticated user ID and turns it into short-lived, single-use grants
//! and finally signed tokens.
//!
//! This crate provides:
//! - the Authorization Code flow with PKCE (RFC 7636)
//! - the Device Authorization Grant (RFC 8628)
//! - callback URL matching with safe wildcards and the RFC 8252 loopback rule
//! - scope-driven ID token claims
//! - envelope encryption of the signing key and other secrets, with rotation
//!
//! ## Modules
//!
//! - [`oauth`] - grant flows and the token endpoint
//! - [`claims`] - ID token claim assembly
//! - [`token`] - signing keys and JWT encoding
//! - [`crypto`] - AEAD, key-encryption keys and secret envelopes
//! - [`rotation`] - encryption key rotation
//! - [`storage`] - storage traits and the in-memory backend
//! - [`audit`] - audit events
//! - [`config`] - server configuration
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pocketid_oidc::prelude::*;
//!
//! let stores = OidcStores::from_backend(Arc::new(InMemoryStore::new()));
//! let authorization = AuthorizationService::new(stores.clone(), Arc::new(TracingAuditSink), &config);
//! let outcome = authorization.authorize(&request, &user_id).await?;
//! ```

pub mod audit;
pub mod claims;
pub mod config;
pub mod crypto;
pub mod error;
pub mod oauth;
pub mod observability;
pub mod random;
pub mod rotation;
pub mod secret;
pub mod storage;
pub mod token;
pub mod types;

pub use config::{ConfigError, OidcConfig};
pub use error::{AuthError, ErrorCategory};
pub use oauth::{
    AuthorizationRequest, AuthorizationService, AuthorizeOutcome, DeviceAuthorizationResponse,
    DeviceCodeManager, OidcStores, TokenIssuer, TokenRequest, TokenResponse,
};
pub use rotation::{EncryptionKeyRotator, RotationReport};
pub use types::{Client, ClientValidationError, GrantType};

/// Type alias for authorization-server results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use pocketid_oidc::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
    pub use crate::claims::{ClaimsAssembler, ClaimsPolicy};
    pub use crate::config::{ConfigError, OidcConfig};
    pub use crate::crypto::{KeyEncryptionKey, KeyPurpose, SecretVault};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::oauth::{
        AuthorizationRequest, AuthorizationService, AuthorizeOutcome, ClientAuthenticator,
        DeviceAuthorizationResponse, DeviceCodeManager, EndSessionRequest, EndSessionService,
        OAuthErrorResponse, OidcStores, TokenIssuer, TokenMinter, TokenRequest, TokenResponse,
    };
    pub use crate::rotation::{EncryptionKeyRotator, RotationReport};
    pub use crate::secret::{Argon2SecretComparator, SecretComparator};
    pub use crate::storage::{
        AuthorizationCodeStorage, ClientStorage, ConsentStorage, DeviceCodeStorage,
        InMemoryStore, UserDirectory,
    };
    pub use crate::token::{SigningAlgorithm, SigningKeyManager, TokenSigner};
    pub use crate::types::{Client, GrantType, User};
}
