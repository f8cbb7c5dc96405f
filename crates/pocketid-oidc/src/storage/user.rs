//! User directory lookup.
//!
//! Users are owned by an external directory (passkeys, LDAP, SCIM); the core
//! only reads them.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::User;

/// Read access to users with their groups and custom claims.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Load a user with groups and custom claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn load_user(&self, user_id: &str) -> AuthResult<Option<User>>;
}
