//! OAuth 2.0 / OpenID Connect grant flows.
//!
//! - [`authorize`] - interactive Authorization Code issuance
//! - [`device`] - Device Authorization Grant (RFC 8628)
//! - [`token`] - the token endpoint, shared by both grants
//! - [`end_session`] - RP-initiated logout validation
//! - [`callback`] / [`pkce`] - redirect matching and proof-key checks
//! - [`client_auth`] - token endpoint client authentication
//! - [`sweeper`] - removal of expired artifacts
//!
//! # Authorization Code Flow
//!
//! ```ignore
//! use pocketid_oidc::oauth::{AuthorizationRequest, AuthorizationService, TokenIssuer, TokenRequest};
//!
//! let outcome = authorization.authorize(&request, &user_id).await?;
//! let redirect = AuthorizationResponse::new(outcome.code, state).to_redirect_url(&outcome.callback_url)?;
//!
//! // ...later, at the token endpoint
//! let tokens = issuer.exchange(&TokenRequest::authorization_code(code, client_id, verifier)).await?;
//! ```

pub mod authorize;
pub mod callback;
pub mod client_auth;
pub mod device;
pub mod end_session;
pub mod pkce;
pub mod sweeper;
pub mod token;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use crate::storage::{
    AuthorizationCodeStorage, ClientStorage, ConsentStorage, DeviceCodeStorage, UserDirectory,
};

pub use authorize::{
    AuthorizationRequest, AuthorizationResponse, AuthorizationService, AuthorizeOutcome,
};
pub use callback::{CallbackError, match_callback_url, validate_callback_pattern};
pub use client_auth::{ClientAuthenticator, parse_basic_auth};
pub use device::{DeviceAuthorizationResponse, DeviceCodeManager};
pub use end_session::{EndSessionRequest, EndSessionService};
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier, validate_code_verifier};
pub use sweeper::{ArtifactSweeper, SweepReport};
pub use token::{OAuthErrorResponse, TokenIssuer, TokenMinter, TokenRequest, TokenResponse};

/// The storage handles the grant services work against.
#[derive(Clone)]
pub struct OidcStores {
    /// Client registrations.
    pub clients: Arc<dyn ClientStorage>,
    /// Authorization codes.
    pub codes: Arc<dyn AuthorizationCodeStorage>,
    /// Device codes.
    pub device_codes: Arc<dyn DeviceCodeStorage>,
    /// User consent.
    pub consents: Arc<dyn ConsentStorage>,
    /// User directory.
    pub users: Arc<dyn UserDirectory>,
}

impl OidcStores {
    /// Uses one backend for every store.
    #[must_use]
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: ClientStorage
            + AuthorizationCodeStorage
            + DeviceCodeStorage
            + ConsentStorage
            + UserDirectory
            + 'static,
    {
        Self {
            clients: backend.clone(),
            codes: backend.clone(),
            device_codes: backend.clone(),
            consents: backend.clone(),
            users: backend,
        }
    }
}

impl std::fmt::Debug for OidcStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcStores").finish_non_exhaustive()
    }
}
