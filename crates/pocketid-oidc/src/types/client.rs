//! OIDC client (relying party) registration.

use serde::{Deserialize, Serialize};

use crate::oauth::callback::{CallbackError, validate_callback_pattern};

// =============================================================================
// Grant Type
// =============================================================================

/// Grant types accepted at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantType {
    /// Authorization Code flow.
    #[serde(rename = "authorization_code")]
    AuthorizationCode,
    /// Device Authorization Grant (RFC 8628).
    #[serde(rename = "urn:ietf:params:oauth:grant-type:device_code")]
    DeviceCode,
}

impl GrantType {
    /// Wire value of the device grant.
    pub const DEVICE_CODE_URN: &'static str = "urn:ietf:params:oauth:grant-type:device_code";

    /// Parses the `grant_type` parameter.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            Self::DEVICE_CODE_URN => Some(Self::DeviceCode),
            _ => None,
        }
    }

    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::DeviceCode => Self::DEVICE_CODE_URN,
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Client
// =============================================================================

/// A registered relying party.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    /// Opaque client identifier.
    pub id: String,

    /// Display name, used in audit events and consent screens.
    pub name: String,

    /// PHC-formatted hash of the client secret. Empty for public clients.
    #[serde(default, skip_serializing)]
    pub secret_hash: String,

    /// Ordered callback URL patterns.
    #[serde(default)]
    pub callback_urls: Vec<String>,

    /// Ordered post-logout callback URL patterns.
    #[serde(default)]
    pub logout_callback_urls: Vec<String>,

    /// Public clients cannot keep a secret and always use PKCE.
    pub is_public: bool,

    /// Require PKCE even though the client is confidential.
    pub pkce_enabled: bool,

    /// Allow the Device Authorization Grant.
    pub device_code_enabled: bool,

    /// Group IDs allowed to authorize this client. Empty means everyone.
    #[serde(default)]
    pub allowed_user_groups: Vec<String>,

    /// User that registered the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Client {
    /// Whether a code redemption must present a PKCE verifier.
    #[must_use]
    pub fn pkce_required(&self) -> bool {
        self.is_public || self.pkce_enabled
    }

    /// Whether the client must authenticate with a secret.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        !self.is_public
    }

    /// Whether a user in `group_ids` may authorize this client.
    #[must_use]
    pub fn allows_groups<'a>(&self, mut group_ids: impl Iterator<Item = &'a str>) -> bool {
        self.allowed_user_groups.is_empty()
            || group_ids.any(|id| self.allowed_user_groups.iter().any(|allowed| allowed == id))
    }

    /// Validates the client registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration is incomplete or inconsistent.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.id.is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }

        if self.name.is_empty() {
            return Err(ClientValidationError::EmptyName);
        }

        if self.is_public && !self.secret_hash.is_empty() {
            return Err(ClientValidationError::PublicClientSecret);
        }

        if !self.is_public && self.secret_hash.is_empty() {
            return Err(ClientValidationError::MissingSecret);
        }

        for pattern in self.callback_urls.iter().chain(&self.logout_callback_urls) {
            validate_callback_pattern(pattern).map_err(ClientValidationError::CallbackUrl)?;
        }

        Ok(())
    }
}

/// Client registration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientValidationError {
    /// Client ID cannot be empty.
    #[error("Client ID cannot be empty")]
    EmptyClientId,

    /// Client name cannot be empty.
    #[error("Client name cannot be empty")]
    EmptyName,

    /// Confidential clients require a client secret.
    #[error("Confidential clients require a client secret")]
    MissingSecret,

    /// Public clients must not carry a secret.
    #[error("Public clients cannot have a client secret")]
    PublicClientSecret,

    /// A callback URL pattern is malformed.
    #[error("{0}")]
    CallbackUrl(CallbackError),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn public_client() -> Client {
        Client {
            id: "c1".to_string(),
            name: "Native App".to_string(),
            secret_hash: String::new(),
            callback_urls: vec!["http://localhost/cb".to_string()],
            logout_callback_urls: vec![],
            is_public: true,
            pkce_enabled: false,
            device_code_enabled: false,
            allowed_user_groups: vec![],
            created_by: None,
        }
    }

    #[test]
    fn test_grant_type_parse() {
        assert_eq!(
            GrantType::parse("authorization_code"),
            Some(GrantType::AuthorizationCode)
        );
        assert_eq!(
            GrantType::parse("urn:ietf:params:oauth:grant-type:device_code"),
            Some(GrantType::DeviceCode)
        );
        assert_eq!(GrantType::parse("client_credentials"), None);
        assert_eq!(GrantType::DeviceCode.to_string(), GrantType::DEVICE_CODE_URN);
    }

    #[test]
    fn test_public_client_requires_pkce() {
        let client = public_client();
        assert!(client.pkce_required());
        assert!(!client.is_confidential());

        let confidential = Client {
            is_public: false,
            secret_hash: "$argon2id$...".to_string(),
            ..public_client()
        };
        assert!(!confidential.pkce_required());
        assert!(
            Client {
                pkce_enabled: true,
                ..confidential
            }
            .pkce_required()
        );
    }

    #[test]
    fn test_allowed_groups() {
        let mut client = public_client();
        assert!(client.allows_groups(std::iter::empty()));

        client.allowed_user_groups = vec!["admins".to_string()];
        assert!(!client.allows_groups(std::iter::empty()));
        assert!(!client.allows_groups(["users"].into_iter()));
        assert!(client.allows_groups(["users", "admins"].into_iter()));
    }

    #[test]
    fn test_validate() {
        assert!(public_client().validate().is_ok());

        let mut client = public_client();
        client.id.clear();
        assert!(matches!(
            client.validate(),
            Err(ClientValidationError::EmptyClientId)
        ));

        let mut client = public_client();
        client.is_public = false;
        assert!(matches!(
            client.validate(),
            Err(ClientValidationError::MissingSecret)
        ));

        let mut client = public_client();
        client.secret_hash = "hash".to_string();
        assert!(matches!(
            client.validate(),
            Err(ClientValidationError::PublicClientSecret)
        ));

        let mut client = public_client();
        client.callback_urls.push("not a url".to_string());
        assert!(matches!(
            client.validate(),
            Err(ClientValidationError::CallbackUrl(_))
        ));
    }

    #[test]
    fn test_secret_hash_not_serialized() {
        let client = Client {
            is_public: false,
            secret_hash: "$argon2id$v=19$secret".to_string(),
            ..public_client()
        };
        let json = serde_json::to_string(&client).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(json.contains("\"isPublic\":false"));
    }
}
