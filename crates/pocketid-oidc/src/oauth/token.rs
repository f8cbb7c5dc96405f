//! Token endpoint.
//!
//! [`TokenIssuer::exchange`] redeems an authorization code or a device code
//! for an ID token and an access token. Both grants end in
//! [`TokenMinter::mint`], which assembles claims from the user's recorded
//! consent and signs both tokens.
//!
//! # Example Request
//!
//! ```text
//! POST /api/oidc/token
//! Content-Type: application/x-www-form-urlencoded
//!
//! grant_type=authorization_code
//! &code=SplxlOBeZQQYbYS6WxSbIA
//! &client_id=c1
//! &code_verifier=dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::claims::ClaimsAssembler;
use crate::oauth::OidcStores;
use crate::oauth::client_auth::ClientAuthenticator;
use crate::oauth::device::DeviceCodeManager;
use crate::oauth::pkce::validate_code_verifier;
use crate::storage::with_deadline;
use crate::token::TokenSigner;
use crate::types::{AuthorizationCode, Client, GrantType};
use crate::{AuthError, AuthResult};

// =============================================================================
// Token Request
// =============================================================================

/// Token request parameters.
///
/// Deserialized from the form body. Client credentials sent as HTTP Basic
/// are merged in by the caller (see
/// [`parse_basic_auth`](crate::oauth::client_auth::parse_basic_auth)).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// `authorization_code` or `urn:ietf:params:oauth:grant-type:device_code`.
    pub grant_type: String,

    /// Authorization code (authorization_code grant).
    #[serde(default)]
    pub code: Option<String>,

    /// Device code (device_code grant).
    #[serde(default)]
    pub device_code: Option<String>,

    /// Client identifier.
    #[serde(default)]
    pub client_id: String,

    /// Client secret (confidential clients).
    #[serde(default)]
    pub client_secret: Option<String>,

    /// PKCE code verifier.
    #[serde(default)]
    pub code_verifier: Option<String>,
}

impl TokenRequest {
    /// An authorization_code grant request.
    #[must_use]
    pub fn authorization_code(code: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            grant_type: GrantType::AuthorizationCode.as_str().to_string(),
            code: Some(code.into()),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// A device_code grant request.
    #[must_use]
    pub fn device_code(device_code: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            grant_type: GrantType::DEVICE_CODE_URN.to_string(),
            device_code: Some(device_code.into()),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the PKCE code verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }
}

// =============================================================================
// Token Response
// =============================================================================

/// Successful token response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed ID token.
    pub id_token: String,

    /// Signed access token.
    pub access_token: String,

    /// Always `"Bearer"`.
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Error body of a failed token request (RFC 6749 §5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OAuthErrorResponse {
    /// OAuth error code.
    pub error: String,

    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<&AuthError> for OAuthErrorResponse {
    fn from(err: &AuthError) -> Self {
        let error_description = if err.is_server_error() {
            Some("internal server error".to_string())
        } else if err.is_polling_state() {
            None
        } else {
            Some(err.to_string())
        };
        Self {
            error: err.oauth_error_code().to_string(),
            error_description,
        }
    }
}

// =============================================================================
// Minting
// =============================================================================

/// Turns an approved grant into signed tokens.
pub struct TokenMinter {
    stores: OidcStores,
    signer: Arc<dyn TokenSigner>,
    assembler: ClaimsAssembler,
    timeout: Duration,
}

impl TokenMinter {
    /// Creates a minter.
    #[must_use]
    pub fn new(
        stores: OidcStores,
        signer: Arc<dyn TokenSigner>,
        assembler: ClaimsAssembler,
        timeout: Duration,
    ) -> Self {
        Self {
            stores,
            signer,
            assembler,
            timeout,
        }
    }

    /// Mints tokens for `user_id` at `client_id`.
    ///
    /// Claims follow the scope of the user's recorded consent for the
    /// client, not the scope of the grant.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` if the user or the consent no longer exists.
    pub async fn mint(
        &self,
        user_id: &str,
        client_id: &str,
        nonce: Option<&str>,
    ) -> AuthResult<TokenResponse> {
        let consent = with_deadline(self.timeout, self.stores.consents.find(user_id, client_id))
            .await?
            .ok_or_else(|| {
                tracing::warn!(client_id = %client_id, user_id = %user_id, "no consent recorded for grant");
                AuthError::invalid_grant("client is not authorized for this user")
            })?;

        let user = with_deadline(self.timeout, self.stores.users.load_user(user_id))
            .await?
            .ok_or_else(|| AuthError::invalid_grant("user no longer exists"))?;

        let claims = self.assembler.assemble(&user, &consent.scope);
        let id_token = self.signer.sign_id_token(&claims, client_id, nonce).await?;
        let access_token = self.signer.sign_access_token(user_id, client_id).await?;

        Ok(TokenResponse {
            id_token,
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.signer.access_token_lifetime().as_secs(),
        })
    }
}

impl std::fmt::Debug for TokenMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenMinter")
            .field("assembler", &self.assembler)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Token Issuer
// =============================================================================

/// Handles token requests for both supported grants.
pub struct TokenIssuer {
    stores: OidcStores,
    authenticator: ClientAuthenticator,
    minter: Arc<TokenMinter>,
    devices: Arc<DeviceCodeManager>,
    timeout: Duration,
}

impl TokenIssuer {
    /// Creates an issuer.
    #[must_use]
    pub fn new(
        stores: OidcStores,
        authenticator: ClientAuthenticator,
        minter: Arc<TokenMinter>,
        devices: Arc<DeviceCodeManager>,
        timeout: Duration,
    ) -> Self {
        Self {
            stores,
            authenticator,
            minter,
            devices,
            timeout,
        }
    }

    /// Exchanges a grant for tokens.
    ///
    /// # Errors
    ///
    /// - `UnsupportedGrantType` for any other grant
    /// - `InvalidClient` when client authentication fails
    /// - `InvalidGrant` for unknown, used, expired or foreign codes and
    ///   failed PKCE verification
    /// - the device polling states for the device grant
    pub async fn exchange(&self, request: &TokenRequest) -> AuthResult<TokenResponse> {
        match GrantType::parse(&request.grant_type) {
            Some(GrantType::AuthorizationCode) => self.exchange_code(request).await,
            Some(GrantType::DeviceCode) => self.exchange_device_code(request).await,
            None => Err(AuthError::unsupported_grant_type(&request.grant_type)),
        }
    }

    async fn exchange_code(&self, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let code = required(request.code.as_deref(), "code")?;
        let client = self.authenticate(request).await?;

        // Consumed on load, whatever the outcome below
        let Some(grant) = with_deadline(self.timeout, self.stores.codes.take(code)).await? else {
            tracing::warn!(client_id = %client.id, "unknown or already redeemed authorization code");
            return Err(AuthError::bad_authorization_code());
        };

        if grant.client_id != client.id || grant.is_expired(OffsetDateTime::now_utc()) {
            tracing::warn!(
                client_id = %client.id,
                user_id = %grant.user_id,
                "authorization code is expired or bound to another client"
            );
            return Err(AuthError::bad_authorization_code());
        }

        verify_pkce(&client, &grant, request.code_verifier.as_deref())?;

        self.minter
            .mint(&grant.user_id, &client.id, grant.nonce.as_deref())
            .await
    }

    async fn exchange_device_code(&self, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let device_code = required(request.device_code.as_deref(), "device_code")?;
        let client = self.authenticate(request).await?;
        if !client.device_code_enabled {
            return Err(AuthError::unsupported_grant_type(GrantType::DEVICE_CODE_URN));
        }
        self.devices.poll_device_code(device_code, &client.id).await
    }

    async fn authenticate(&self, request: &TokenRequest) -> AuthResult<Client> {
        self.authenticator
            .authenticate(&request.client_id, request.client_secret.as_deref())
            .await
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("authenticator", &self.authenticator)
            .finish_non_exhaustive()
    }
}

/// Checks the code verifier when the client requires PKCE or the code was
/// issued with a challenge.
fn verify_pkce(client: &Client, grant: &AuthorizationCode, verifier: Option<&str>) -> AuthResult<()> {
    if !client.pkce_required() && grant.code_challenge.is_none() {
        return Ok(());
    }

    let verified = match (grant.code_challenge.as_deref(), verifier) {
        (Some(challenge), Some(verifier)) => {
            validate_code_verifier(verifier, challenge, grant.code_challenge_method)
        }
        _ => false,
    };
    if verified {
        Ok(())
    } else {
        tracing::warn!(client_id = %client.id, "PKCE verification failed");
        Err(AuthError::invalid_grant("invalid code verifier"))
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> AuthResult<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::invalid_request(format!("{name} is required")))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::authorize::AuthorizationRequest;
    use crate::oauth::pkce::{PkceChallenge, PkceVerifier};
    use crate::oauth::test_support::{Harness, confidential_client, public_client};
    use crate::storage::AuthorizationCodeStorage;
    use crate::token::IdTokenClaims;

    async fn authorize(h: &Harness, client_id: &str, challenge: &str, method: &str) -> String {
        let request = AuthorizationRequest {
            client_id: client_id.to_string(),
            scope: "openid email profile".to_string(),
            callback_url: String::new(),
            nonce: "nonce-1".to_string(),
            code_challenge: challenge.to_string(),
            code_challenge_method: method.to_string(),
        };
        h.authorization().authorize(&request, "u1").await.unwrap().code
    }

    #[tokio::test]
    async fn test_code_exchange_with_s256() {
        let h = Harness::new().await;
        h.add_client(public_client("c1")).await;
        let verifier = PkceVerifier::generate();
        let challenge = PkceChallenge::from_verifier(&verifier);
        let code = authorize(&h, "c1", challenge.as_str(), "S256").await;

        let issuer = h.issuer();
        let request = TokenRequest::authorization_code(&code, "c1").with_verifier(verifier.as_str());
        let tokens = issuer.exchange(&request).await.unwrap();

        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_in, 3600);

        let claims: IdTokenClaims = h.signer.verify_id_token(&tokens.id_token, false).unwrap();
        assert_eq!(claims.subject(), Some("u1"));
        assert_eq!(claims.aud, vec!["c1".to_string()]);
        assert_eq!(claims.nonce.as_deref(), Some("nonce-1"));
        assert_eq!(claims.claims["email"], "alice@example.com");
        assert_eq!(claims.claims["department"], "research");

        let err = issuer.exchange(&request).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_wrong_verifier_consumes_code() {
        let h = Harness::new().await;
        h.add_client(public_client("c1")).await;
        let verifier = PkceVerifier::generate();
        let code = authorize(&h, "c1", PkceChallenge::from_verifier(&verifier).as_str(), "S256").await;

        let issuer = h.issuer();
        let wrong = TokenRequest::authorization_code(&code, "c1")
            .with_verifier(PkceVerifier::generate().as_str());
        assert!(matches!(
            issuer.exchange(&wrong).await.unwrap_err(),
            AuthError::InvalidGrant { .. }
        ));

        let right = TokenRequest::authorization_code(&code, "c1").with_verifier(verifier.as_str());
        assert!(matches!(
            issuer.exchange(&right).await.unwrap_err(),
            AuthError::InvalidGrant { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_verifier_for_public_client() {
        let h = Harness::new().await;
        h.add_client(public_client("c1")).await;
        let code = authorize(&h, "c1", "verifier-abc", "plain").await;

        let err = h
            .issuer()
            .exchange(&TokenRequest::authorization_code(&code, "c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_confidential_client_needs_secret() {
        let h = Harness::new().await;
        h.add_client(confidential_client("web")).await;
        let code = authorize(&h, "web", "", "").await;
        let issuer = h.issuer();

        let err = issuer
            .exchange(&TokenRequest::authorization_code(&code, "web").with_secret("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidClient { .. }));

        // A failed client authentication leaves the code redeemable
        let tokens = issuer
            .exchange(&TokenRequest::authorization_code(&code, "web").with_secret("s3cret"))
            .await
            .unwrap();
        assert!(!tokens.access_token.is_empty());
    }

    #[tokio::test]
    async fn test_code_bound_to_other_client() {
        let h = Harness::new().await;
        h.add_client(confidential_client("web")).await;
        h.add_client(confidential_client("other")).await;
        let code = authorize(&h, "web", "", "").await;

        let err = h
            .issuer()
            .exchange(&TokenRequest::authorization_code(&code, "other").with_secret("s3cret"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), AuthError::bad_authorization_code().to_string());
        assert_eq!(h.store.authorization_code_count().await, 0);
    }

    #[tokio::test]
    async fn test_expired_code() {
        let h = Harness::new().await;
        h.add_client(confidential_client("web")).await;
        let now = OffsetDateTime::now_utc();
        AuthorizationCodeStorage::create(
            &h.store,
            &AuthorizationCode {
                code: "stale".to_string(),
                client_id: "web".to_string(),
                user_id: "u1".to_string(),
                scope: "openid".to_string(),
                nonce: None,
                code_challenge: None,
                code_challenge_method: Default::default(),
                created_at: now - time::Duration::minutes(20),
                expires_at: now - time::Duration::minutes(5),
            },
        )
        .await
        .unwrap();

        let err = h
            .issuer()
            .exchange(&TokenRequest::authorization_code("stale", "web").with_secret("s3cret"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_redemption_succeeds_once() {
        let h = Harness::new().await;
        h.add_client(confidential_client("web")).await;
        let code = authorize(&h, "web", "", "").await;
        let issuer = Arc::new(h.issuer());

        let attempts = (0..8).map(|_| {
            let issuer = issuer.clone();
            let request = TokenRequest::authorization_code(&code, "web").with_secret("s3cret");
            tokio::spawn(async move { issuer.exchange(&request).await })
        });
        let results = futures_util::future::join_all(attempts).await;

        let successes = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let h = Harness::new().await;
        let request = TokenRequest {
            grant_type: "password".to_string(),
            ..TokenRequest::default()
        };
        let err = h.issuer().exchange(&request).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "unsupported_grant_type");
    }

    #[tokio::test]
    async fn test_missing_code_parameter() {
        let h = Harness::new().await;
        let request = TokenRequest {
            grant_type: "authorization_code".to_string(),
            client_id: "c1".to_string(),
            ..TokenRequest::default()
        };
        let err = h.issuer().exchange(&request).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest { .. }));
    }

    #[test]
    fn test_error_response_body() {
        let body = OAuthErrorResponse::from(&AuthError::bad_authorization_code());
        assert_eq!(body.error, "invalid_grant");
        assert_eq!(
            body.error_description.as_deref(),
            Some("Invalid grant: invalid authorization code")
        );

        let body = OAuthErrorResponse::from(&AuthError::storage("connection reset"));
        assert_eq!(body.error, "server_error");
        assert_eq!(body.error_description.as_deref(), Some("internal server error"));

        let json = serde_json::to_value(OAuthErrorResponse::from(&AuthError::SlowDown)).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "slow_down" }));
    }

    #[test]
    fn test_request_from_form() {
        let request: TokenRequest = serde_json::from_value(serde_json::json!({
            "grant_type": "authorization_code",
            "code": "abc",
            "client_id": "c1"
        }))
        .unwrap();
        assert_eq!(request.code.as_deref(), Some("abc"));
        assert!(request.client_secret.is_none());
    }
}
