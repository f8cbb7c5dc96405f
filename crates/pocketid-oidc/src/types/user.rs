//! The directory's view of a user, as needed for claims and group policy.

use serde::{Deserialize, Serialize};

/// A custom claim stored as a raw string value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomClaim {
    /// Claim name.
    pub key: String,
    /// Raw value; parsed as JSON when possible.
    pub value: String,
}

impl CustomClaim {
    /// Creates a claim.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A group the user belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGroup {
    /// Group ID, referenced by client group restrictions.
    pub id: String,
    /// Group name, emitted in the `groups` claim.
    pub name: String,
    /// Claims inherited by every member.
    #[serde(default)]
    pub custom_claims: Vec<CustomClaim>,
}

/// A user with groups and custom claims loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable user ID (`sub`).
    pub id: String,
    /// Login name (`preferred_username`).
    pub username: String,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Given name.
    #[serde(default)]
    pub first_name: String,
    /// Family name.
    #[serde(default)]
    pub last_name: String,
    /// Claims set on the user directly.
    #[serde(default)]
    pub custom_claims: Vec<CustomClaim>,
    /// Group memberships.
    #[serde(default)]
    pub groups: Vec<UserGroup>,
}

impl User {
    /// `first_name last_name`, trimmed.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// IDs of the user's groups.
    pub fn group_ids(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.id.as_str())
    }
}
