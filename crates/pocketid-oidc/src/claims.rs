//! User claims for ID tokens.
//!
//! [`ClaimsAssembler`] is a pure function of the user, the granted scope and
//! a [`ClaimsPolicy`] snapshot. Scope values are matched as whole
//! space-separated tokens.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{CustomClaim, User};

/// Claims a custom claim can never overwrite.
pub const RESERVED_CLAIMS: &[&str] = &[
    "sub",
    "iss",
    "aud",
    "exp",
    "iat",
    "nbf",
    "nonce",
    "jti",
    "email",
    "email_verified",
    "groups",
    "given_name",
    "family_name",
    "name",
    "preferred_username",
    "picture",
];

/// A custom claim value: JSON when the raw string parses as JSON, the raw
/// string otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    /// Raw string value.
    String(String),
    /// Parsed JSON value (object, array, number, boolean or string).
    Json(Value),
}

impl ClaimValue {
    /// Parses a stored custom claim value. JSON `null` counts as unparsable.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Null) | Err(_) => Self::String(raw.to_string()),
            Ok(value) => Self::Json(value),
        }
    }

    /// Converts into a JSON value for the token body.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::String(s) => Value::String(s),
            Self::Json(v) => v,
        }
    }
}

/// Server-wide settings that influence claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsPolicy {
    /// Value of `email_verified` for every user.
    pub emails_verified: bool,
    /// Base URL used for the `picture` claim.
    pub app_url: String,
}

impl ClaimsPolicy {
    /// Snapshot of the policy from configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::OidcConfig) -> Self {
        Self {
            emails_verified: config.emails_verified,
            app_url: config.base_url().to_string(),
        }
    }
}

/// Builds the claim set for a user and a granted scope.
#[derive(Debug, Clone)]
pub struct ClaimsAssembler {
    policy: ClaimsPolicy,
}

impl ClaimsAssembler {
    /// Creates an assembler with a fixed policy snapshot.
    #[must_use]
    pub fn new(policy: ClaimsPolicy) -> Self {
        Self { policy }
    }

    /// Returns the claims of `user` visible under `scope`.
    #[must_use]
    pub fn assemble(&self, user: &User, scope: &str) -> Map<String, Value> {
        let has_scope = |wanted: &str| scope.split_whitespace().any(|s| s == wanted);

        let mut claims = Map::new();
        claims.insert("sub".to_string(), Value::from(user.id.as_str()));

        if has_scope("email") {
            if let Some(email) = &user.email {
                claims.insert("email".to_string(), Value::from(email.as_str()));
            }
            claims.insert(
                "email_verified".to_string(),
                Value::Bool(self.policy.emails_verified),
            );
        }

        if has_scope("groups") {
            let names: Vec<Value> = user
                .groups
                .iter()
                .map(|g| Value::from(g.name.as_str()))
                .collect();
            claims.insert("groups".to_string(), Value::Array(names));
        }

        if has_scope("profile") {
            claims.insert("given_name".to_string(), Value::from(user.first_name.as_str()));
            claims.insert("family_name".to_string(), Value::from(user.last_name.as_str()));
            claims.insert("name".to_string(), Value::from(user.full_name()));
            claims.insert(
                "preferred_username".to_string(),
                Value::from(user.username.as_str()),
            );
            claims.insert(
                "picture".to_string(),
                Value::from(format!(
                    "{}/api/users/{}/profile-picture.png",
                    self.policy.app_url.trim_end_matches('/'),
                    user.id
                )),
            );

            for (key, value) in custom_claims(user) {
                claims.insert(key, value.into_value());
            }
        }

        claims
    }
}

/// Merges group claims (in group order) and then user claims, so a user
/// claim replaces a group claim with the same key.
fn custom_claims(user: &User) -> BTreeMap<String, ClaimValue> {
    let group_claims = user.groups.iter().flat_map(|g| g.custom_claims.iter());
    let mut merged = BTreeMap::new();
    for CustomClaim { key, value } in group_claims.chain(user.custom_claims.iter()) {
        if RESERVED_CLAIMS.contains(&key.as_str()) {
            tracing::debug!(user_id = %user.id, claim = %key, "ignoring reserved custom claim");
            continue;
        }
        merged.insert(key.clone(), ClaimValue::parse(value));
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserGroup;
    use serde_json::json;

    fn assembler() -> ClaimsAssembler {
        ClaimsAssembler::new(ClaimsPolicy {
            emails_verified: true,
            app_url: "https://id.example.com/".to_string(),
        })
    }

    fn user() -> User {
        User {
            id: "u1".to_string(),
            username: "tim".to_string(),
            email: Some("tim@example.com".to_string()),
            first_name: "Tim".to_string(),
            last_name: "Cook".to_string(),
            custom_claims: vec![CustomClaim::new("department", "design")],
            groups: vec![
                UserGroup {
                    id: "g1".to_string(),
                    name: "admins".to_string(),
                    custom_claims: vec![
                        CustomClaim::new("department", "ops"),
                        CustomClaim::new("level", "3"),
                    ],
                },
                UserGroup {
                    id: "g2".to_string(),
                    name: "staff".to_string(),
                    custom_claims: vec![CustomClaim::new("level", "5")],
                },
            ],
        }
    }

    #[test]
    fn test_openid_only_has_sub() {
        let claims = assembler().assemble(&user(), "openid");
        assert_eq!(Value::Object(claims), json!({ "sub": "u1" }));
    }

    #[test]
    fn test_email_scope() {
        let claims = assembler().assemble(&user(), "openid email");
        assert_eq!(claims["email"], "tim@example.com");
        assert_eq!(claims["email_verified"], true);
        assert!(!claims.contains_key("name"));
    }

    #[test]
    fn test_scope_is_matched_by_token() {
        let claims = assembler().assemble(&user(), "openid emails profiles");
        assert!(!claims.contains_key("email"));
        assert!(!claims.contains_key("name"));
    }

    #[test]
    fn test_groups_scope() {
        let claims = assembler().assemble(&user(), "groups");
        assert_eq!(claims["groups"], json!(["admins", "staff"]));
    }

    #[test]
    fn test_profile_scope() {
        let claims = assembler().assemble(&user(), "openid profile");
        assert_eq!(claims["given_name"], "Tim");
        assert_eq!(claims["family_name"], "Cook");
        assert_eq!(claims["name"], "Tim Cook");
        assert_eq!(claims["preferred_username"], "tim");
        assert_eq!(
            claims["picture"],
            "https://id.example.com/api/users/u1/profile-picture.png"
        );
    }

    #[test]
    fn test_custom_claim_precedence() {
        let claims = assembler().assemble(&user(), "profile");
        // user beats group
        assert_eq!(claims["department"], "design");
        // later group beats earlier group
        assert_eq!(claims["level"], 5);
    }

    #[test]
    fn test_custom_claims_need_profile() {
        let claims = assembler().assemble(&user(), "openid email groups");
        assert!(!claims.contains_key("department"));
    }

    #[test]
    fn test_reserved_custom_claims_ignored() {
        let mut user = user();
        user.custom_claims.push(CustomClaim::new("sub", "admin"));
        user.custom_claims.push(CustomClaim::new("email", "evil@example.com"));
        let claims = assembler().assemble(&user, "profile email");
        assert_eq!(claims["sub"], "u1");
        assert_eq!(claims["email"], "tim@example.com");
    }

    #[test]
    fn test_claim_value_parse() {
        assert_eq!(ClaimValue::parse("plain text"), ClaimValue::String("plain text".to_string()));
        assert_eq!(ClaimValue::parse("42"), ClaimValue::Json(json!(42)));
        assert_eq!(ClaimValue::parse(r#"{"a":[1,2]}"#), ClaimValue::Json(json!({"a": [1, 2]})));
        assert_eq!(ClaimValue::parse("null"), ClaimValue::String("null".to_string()));
        assert_eq!(ClaimValue::parse(""), ClaimValue::String(String::new()));
    }
}
