//! One-time authorization codes.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::oauth::pkce::PkceChallengeMethod;

/// An issued authorization code, bound to client, user, scope and PKCE data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// Random 32-character code.
    pub code: String,
    /// Client the code was issued to.
    pub client_id: String,
    /// User that authorized the client.
    pub user_id: String,
    /// Granted scope (space-separated).
    pub scope: String,
    /// OIDC nonce from the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// PKCE challenge, when one was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    /// PKCE challenge method.
    #[serde(default)]
    pub code_challenge_method: PkceChallengeMethod,
    /// When the code was issued.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the code stops being redeemable.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Lifecycle of a stored authorization code.
///
/// A redeemed code no longer exists, so it has no state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationCodeState {
    /// Redeemable.
    Active,
    /// Past its expiry; only the sweeper may touch it.
    Expired,
}

impl AuthorizationCode {
    /// State of the code at `now`.
    #[must_use]
    pub fn state(&self, now: OffsetDateTime) -> AuthorizationCodeState {
        if now >= self.expires_at {
            AuthorizationCodeState::Expired
        } else {
            AuthorizationCodeState::Active
        }
    }

    /// Returns `true` if the code is past its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.state(now) == AuthorizationCodeState::Expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_state_follows_expiry() {
        let now = OffsetDateTime::now_utc();
        let code = AuthorizationCode {
            code: "c".repeat(32),
            client_id: "client".to_string(),
            user_id: "user".to_string(),
            scope: "openid".to_string(),
            nonce: None,
            code_challenge: None,
            code_challenge_method: PkceChallengeMethod::Plain,
            created_at: now,
            expires_at: now + Duration::minutes(15),
        };

        assert_eq!(code.state(now), AuthorizationCodeState::Active);
        assert_eq!(
            code.state(now + Duration::minutes(15)),
            AuthorizationCodeState::Expired
        );
        assert!(code.is_expired(now + Duration::hours(1)));
    }
}
