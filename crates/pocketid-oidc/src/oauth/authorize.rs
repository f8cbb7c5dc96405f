//! Authorization endpoint: consent bookkeeping and code issuance.
//!
//! The caller has already authenticated the user. [`AuthorizationService`]
//! validates the client, PKCE parameters and callback URL, enforces the
//! client's group restriction, records consent and issues a one-time code.
//!
//! # Flow
//!
//! `Received → ClientValidated → ConsentResolved → CodeIssued`. Any failure
//! before `CodeIssued` leaves no code behind.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::audit::{AuditEvent, AuditSink, client_metadata};
use crate::config::{OidcConfig, expiry};
use crate::oauth::OidcStores;
use crate::oauth::callback::match_callback_url;
use crate::oauth::pkce::PkceChallengeMethod;
use crate::random::{CODE_LENGTH, alphanumeric};
use crate::storage::{ConsentStorage, with_deadline};
use crate::types::{AuthorizationCode, Client, User};
use crate::{AuthError, AuthResult};

// =============================================================================
// Request / Response
// =============================================================================

/// Parameters of an authorization request, as received by the endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizationRequest {
    /// Requesting client.
    pub client_id: String,

    /// Requested scope (space-separated).
    #[serde(default)]
    pub scope: String,

    /// Requested callback URL. Empty selects the client's first pattern.
    #[serde(default, rename = "redirect_uri")]
    pub callback_url: String,

    /// OIDC nonce, echoed in the ID token.
    #[serde(default)]
    pub nonce: String,

    /// PKCE code challenge.
    #[serde(default)]
    pub code_challenge: String,

    /// PKCE challenge method (`S256` or `plain`).
    #[serde(default)]
    pub code_challenge_method: String,
}

/// Result of a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeOutcome {
    /// The issued authorization code.
    pub code: String,
    /// The callback URL the code is delivered to.
    pub callback_url: String,
    /// Whether the user consented to this client (or this scope) for the
    /// first time.
    pub new_consent: bool,
}

/// Authorization response delivered to the client's callback.
///
/// # Example
///
/// ```
/// use pocketid_oidc::oauth::AuthorizationResponse;
///
/// let response = AuthorizationResponse::new("abc", "xyz");
/// let url = response.to_redirect_url("https://app.example.com/cb?a=1").unwrap();
/// assert_eq!(url, "https://app.example.com/cb?a=1&code=abc&state=xyz");
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationResponse {
    /// The authorization code.
    pub code: String,

    /// The state value from the request, echoed unchanged.
    pub state: String,
}

impl AuthorizationResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            state: state.into(),
        }
    }

    /// Appends `code` and `state` (when non-empty) to the callback URL.
    ///
    /// # Errors
    ///
    /// Returns an error if `callback_url` is not a valid URL.
    pub fn to_redirect_url(&self, callback_url: &str) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(callback_url)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", &self.code);
            if !self.state.is_empty() {
                pairs.append_pair("state", &self.state);
            }
        }
        Ok(url.to_string())
    }
}

// =============================================================================
// Service
// =============================================================================

/// Issues authorization codes for authenticated users.
pub struct AuthorizationService {
    stores: OidcStores,
    audit: Arc<dyn AuditSink>,
    code_lifetime: Duration,
    timeout: Duration,
}

impl AuthorizationService {
    /// Creates the service.
    #[must_use]
    pub fn new(stores: OidcStores, audit: Arc<dyn AuditSink>, config: &OidcConfig) -> Self {
        Self {
            stores,
            audit,
            code_lifetime: config.authorization_code_lifetime,
            timeout: config.storage.operation_timeout,
        }
    }

    /// Authorizes `request` on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// - `InvalidClient` for an unknown client
    /// - `InvalidRequest` for a missing PKCE challenge, an unsupported
    ///   challenge method or an unregistered callback URL
    /// - `AccessDenied` when the client is restricted to groups the user is
    ///   not in
    /// - `Storage` when the data layer fails
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
        user_id: &str,
    ) -> AuthResult<AuthorizeOutcome> {
        let client = with_deadline(self.timeout, self.stores.clients.find_by_id(&request.client_id))
            .await?
            .ok_or_else(|| AuthError::invalid_client("unknown client"))?;

        if client.pkce_required() && request.code_challenge.is_empty() {
            return Err(AuthError::invalid_request(
                "code_challenge is required for this client",
            ));
        }
        let method = PkceChallengeMethod::parse(&request.code_challenge_method)?;

        let callback_url = match_callback_url(&client.callback_urls, &request.callback_url)?;

        let user = self.load_user(user_id).await?;
        ensure_group_access(&client, &user)?;

        let now = OffsetDateTime::now_utc();
        let expires_at = expiry(now, "authorization_code_lifetime", self.code_lifetime)?;
        let new_consent = resolve_consent(
            self.stores.consents.as_ref(),
            user_id,
            &client.id,
            &request.scope,
            now,
            self.timeout,
        )
        .await?;

        let code = AuthorizationCode {
            code: alphanumeric(CODE_LENGTH),
            client_id: client.id.clone(),
            user_id: user_id.to_string(),
            scope: request.scope.clone(),
            nonce: non_empty(&request.nonce),
            code_challenge: non_empty(&request.code_challenge),
            code_challenge_method: method,
            created_at: now,
            expires_at,
        };
        with_deadline(self.timeout, self.stores.codes.create(&code)).await?;

        tracing::info!(
            client_id = %client.id,
            user_id = %user_id,
            new_consent,
            "issued authorization code"
        );

        self.audit
            .record(
                AuditEvent::client_authorization(new_consent),
                user_id,
                client_metadata(&client.name),
            )
            .await;

        Ok(AuthorizeOutcome {
            code: code.code,
            callback_url,
            new_consent,
        })
    }

    async fn load_user(&self, user_id: &str) -> AuthResult<User> {
        with_deadline(self.timeout, self.stores.users.load_user(user_id))
            .await?
            .ok_or_else(|| AuthError::access_denied("unknown user"))
    }
}

impl std::fmt::Debug for AuthorizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationService")
            .field("code_lifetime", &self.code_lifetime)
            .finish_non_exhaustive()
    }
}

/// Rejects users outside the client's allowed groups.
pub(crate) fn ensure_group_access(client: &Client, user: &User) -> AuthResult<()> {
    if client.allows_groups(user.group_ids()) {
        return Ok(());
    }
    tracing::warn!(
        client_id = %client.id,
        user_id = %user.id,
        "user is not in any group allowed to use this client"
    );
    Err(AuthError::access_denied(
        "you're not allowed to access this service",
    ))
}

/// Records the user's consent to `scope` and reports whether it is new.
///
/// An identical stored scope only refreshes the last-used time. Anything
/// else (no row, or a different scope) goes through the atomic upsert,
/// replacing the stored scope.
pub(crate) async fn resolve_consent(
    consents: &dyn ConsentStorage,
    user_id: &str,
    client_id: &str,
    scope: &str,
    now: OffsetDateTime,
    timeout: Duration,
) -> AuthResult<bool> {
    let existing = with_deadline(timeout, consents.find(user_id, client_id)).await?;
    if existing.is_some_and(|consent| consent.scope == scope) {
        with_deadline(timeout, consents.touch(user_id, client_id, now)).await?;
        return Ok(false);
    }

    with_deadline(timeout, consents.upsert(user_id, client_id, scope, now)).await?;
    Ok(true)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

// =============================================================================
// Tests
// =============================================================================
