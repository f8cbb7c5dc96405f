//! Client authentication at the token endpoint.
//!
//! Confidential clients present `client_id` + `client_secret`, either in the
//! request body or as HTTP Basic credentials. Public clients present their
//! `client_id` only. Every failure returns the same `invalid_client` error,
//! and unknown clients pay for a dummy hash comparison, so the response does
//! not reveal whether a client exists.

use std::sync::Arc;
use std::time::Duration;

use crate::secret::{SecretComparator, dummy_hash};
use crate::storage::{ClientStorage, with_deadline};
use crate::types::Client;
use crate::{AuthError, AuthResult};

/// Authenticates token endpoint callers.
pub struct ClientAuthenticator {
    clients: Arc<dyn ClientStorage>,
    comparator: Arc<dyn SecretComparator>,
    timeout: Duration,
}

impl ClientAuthenticator {
    /// Creates an authenticator.
    #[must_use]
    pub fn new(
        clients: Arc<dyn ClientStorage>,
        comparator: Arc<dyn SecretComparator>,
        timeout: Duration,
    ) -> Self {
        Self {
            clients,
            comparator,
            timeout,
        }
    }

    /// Returns the client identified by `client_id` if the credentials hold.
    ///
    /// Public clients pass with their ID alone; a secret they send anyway is
    /// ignored. Confidential clients must present the matching secret.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidClient` ("invalid client credentials") for
    /// an unknown client, a missing secret and a wrong secret alike.
    pub async fn authenticate(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> AuthResult<Client> {
        let client = if client_id.is_empty() {
            None
        } else {
            with_deadline(self.timeout, self.clients.find_by_id(client_id)).await?
        };

        let Some(client) = client else {
            // Burn the same CPU time as a real comparison
            self.compare(dummy_hash().to_string(), client_secret.unwrap_or_default())
                .await?;
            tracing::warn!(client_id = %client_id, "token request for unknown client");
            return Err(AuthError::bad_client_credentials());
        };

        if client.is_public {
            return Ok(client);
        }

        // Runs the comparison even for an empty secret
        let secret = client_secret.unwrap_or_default();
        let matches = self.compare(client.secret_hash.clone(), secret).await?;
        if secret.is_empty() || !matches {
            tracing::warn!(client_id = %client.id, "client authentication failed");
            return Err(AuthError::bad_client_credentials());
        }

        Ok(client)
    }

    async fn compare(&self, hash: String, candidate: &str) -> AuthResult<bool> {
        let comparator = Arc::clone(&self.comparator);
        let candidate = candidate.to_string();
        tokio::task::spawn_blocking(move || comparator.compare(&hash, &candidate))
            .await
            .map_err(|e| AuthError::internal(format!("secret comparison task failed: {e}")))
    }
}

impl std::fmt::Debug for ClientAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAuthenticator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Parses HTTP Basic authentication credentials.
///
/// Returns `Some((client_id, client_secret))` if valid, `None` otherwise.
/// Both parts are percent-decoded as required by RFC 6749 §2.3.1.
///
/// # Example
///
/// ```
/// use pocketid_oidc::oauth::client_auth::parse_basic_auth;
///
/// let (id, secret) = parse_basic_auth("Basic Y2xpZW50X2lkOmNsaWVudF9zZWNyZXQ=").unwrap();
/// assert_eq!(id, "client_id");
/// assert_eq!(secret, "client_secret");
/// ```
#[must_use]
pub fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let encoded = header_value.trim().strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    // Split on first colon (password may contain colons)
    let (client_id, client_secret) = credentials.split_once(':')?;
    let decode = |s: &str| {
        url::form_urlencoded::parse(format!("v={s}").as_bytes())
            .next()
            .map(|(_, v)| v.into_owned())
    };

    Some((decode(client_id)?, decode(client_secret)?))
}
