//! RP-initiated logout (OpenID Connect RP-Initiated Logout 1.0).
//!
//! Resolves where to send the browser after the session ends. The client is
//! identified by the `id_token_hint`, which must verify against the live
//! signing key; its expiry is ignored.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::oauth::OidcStores;
use crate::oauth::callback::match_callback_url;
use crate::storage::with_deadline;
use crate::token::SigningKeyManager;
use crate::{AuthError, AuthResult};

/// Parameters of an end-session request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndSessionRequest {
    /// A previously issued ID token.
    #[serde(default)]
    pub id_token_hint: Option<String>,

    /// Client the logout is for; must match the token's audience.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Requested post-logout destination. Empty selects the first pattern.
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,
}

/// Validates end-session requests.
pub struct EndSessionService {
    stores: OidcStores,
    keys: Arc<SigningKeyManager>,
    timeout: Duration,
}

impl EndSessionService {
    /// Creates the service.
    #[must_use]
    pub fn new(stores: OidcStores, keys: Arc<SigningKeyManager>, timeout: Duration) -> Self {
        Self {
            stores,
            keys,
            timeout,
        }
    }

    /// Returns the post-logout URL for `user_id`'s session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when the hint is missing or invalid, belongs
    /// to another user or client, the client was never authorized by the
    /// user, or the redirect URI is not registered.
    pub async fn validate(&self, request: &EndSessionRequest, user_id: &str) -> AuthResult<String> {
        let hint = request
            .id_token_hint
            .as_deref()
            .filter(|hint| !hint.is_empty())
            .ok_or_else(|| AuthError::invalid_request("id_token_hint is required"))?;
        let claims = self.keys.verify_id_token(hint, true)?;

        let client_id = claims
            .aud
            .first()
            .map(String::as_str)
            .ok_or_else(|| AuthError::invalid_request("invalid id token"))?;
        if let Some(requested) = request.client_id.as_deref().filter(|id| !id.is_empty()) {
            if requested != client_id {
                return Err(AuthError::invalid_request(
                    "client_id does not match the id_token_hint",
                ));
            }
        }

        if claims.subject() != Some(user_id) {
            tracing::warn!(client_id = %client_id, user_id = %user_id, "id_token_hint issued to another user");
            return Err(AuthError::invalid_request(
                "id_token_hint was issued to another user",
            ));
        }

        let consent = with_deadline(self.timeout, self.stores.consents.find(user_id, client_id)).await?;
        if consent.is_none() {
            return Err(AuthError::invalid_request(
                "client is not authorized for this user",
            ));
        }

        let client = with_deadline(self.timeout, self.stores.clients.find_by_id(client_id))
            .await?
            .ok_or_else(|| AuthError::invalid_request("unknown client"))?;
        if client.logout_callback_urls.is_empty() {
            return Err(AuthError::invalid_request(
                "client has no logout callback URLs",
            ));
        }

        let requested = request.post_logout_redirect_uri.as_deref().unwrap_or_default();
        Ok(match_callback_url(&client.logout_callback_urls, requested)?)
    }
}

impl std::fmt::Debug for EndSessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndSessionService")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::authorize::AuthorizationRequest;
    use crate::oauth::test_support::{Harness, public_client};
    use crate::oauth::token::TokenRequest;
    use crate::types::{CustomClaim, User};

    async fn logged_in(h: &Harness) -> String {
        h.add_client(public_client("c1")).await;
        let request = AuthorizationRequest {
            client_id: "c1".to_string(),
            scope: "openid".to_string(),
            code_challenge: "verifier-abc".to_string(),
            ..AuthorizationRequest::default()
        };
        let code = h.authorization().authorize(&request, "u1").await.unwrap().code;
        h.issuer()
            .exchange(&TokenRequest::authorization_code(code, "c1").with_verifier("verifier-abc"))
            .await
            .unwrap()
            .id_token
    }

    fn service(h: &Harness) -> EndSessionService {
        EndSessionService::new(h.stores.clone(), h.signer.clone(), h.timeout())
    }

    #[tokio::test]
    async fn test_resolves_logout_callback() {
        let h = Harness::new().await;
        let id_token = logged_in(&h).await;

        let request = EndSessionRequest {
            id_token_hint: Some(id_token.clone()),
            client_id: Some("c1".to_string()),
            post_logout_redirect_uri: None,
        };
        assert_eq!(
            service(&h).validate(&request, "u1").await.unwrap(),
            "https://app.example.com/logout"
        );

        let request = EndSessionRequest {
            id_token_hint: Some(id_token),
            client_id: None,
            post_logout_redirect_uri: Some("https://evil.example.com/logout".to_string()),
        };
        assert!(service(&h).validate(&request, "u1").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_mismatches() {
        let h = Harness::new().await;
        let id_token = logged_in(&h).await;

        let missing = EndSessionRequest::default();
        assert!(matches!(
            service(&h).validate(&missing, "u1").await.unwrap_err(),
            AuthError::InvalidRequest { .. }
        ));

        let other_client = EndSessionRequest {
            id_token_hint: Some(id_token.clone()),
            client_id: Some("c2".to_string()),
            ..EndSessionRequest::default()
        };
        assert!(service(&h).validate(&other_client, "u1").await.is_err());

        h.store
            .insert_user(User {
                id: "u2".to_string(),
                username: "bob".to_string(),
                email: None,
                first_name: String::new(),
                last_name: String::new(),
                custom_claims: vec![CustomClaim::new("k", "v")],
                groups: vec![],
            })
            .await;
        let other_user = EndSessionRequest {
            id_token_hint: Some(id_token),
            ..EndSessionRequest::default()
        };
        assert!(service(&h).validate(&other_user, "u2").await.is_err());

        let garbage = EndSessionRequest {
            id_token_hint: Some("not.a.jwt".to_string()),
            ..EndSessionRequest::default()
        };
        assert!(service(&h).validate(&garbage, "u1").await.is_err());
    }

    #[tokio::test]
    async fn test_revoked_consent() {
        let h = Harness::new().await;
        let id_token = logged_in(&h).await;
        assert!(h.stores.consents.revoke("u1", "c1").await.unwrap());

        let request = EndSessionRequest {
            id_token_hint: Some(id_token),
            ..EndSessionRequest::default()
        };
        assert!(service(&h).validate(&request, "u1").await.is_err());
    }
}
