//! User consent storage trait.
//!
//! Consents are stored persistently and decide between first-time and repeat
//! authorization. There is at most one row per (user, client).
//!
//! # Implementation Notes
//!
//! [`ConsentStorage::upsert`] must be a single atomic insert-or-update keyed
//! on (user, client), e.g. `INSERT ... ON CONFLICT (user_id, client_id) DO
//! UPDATE`. Two concurrent first-time consents therefore both succeed: one
//! creates the row, the other overwrites its scope.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::{ConsentUpsert, UserAuthorizedClient};

/// Storage trait for user consent records.
#[async_trait]
pub trait ConsentStorage: Send + Sync {
    /// Find the consent for a user+client pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> AuthResult<Option<UserAuthorizedClient>>;

    /// Create the consent or overwrite its scope, stamping `last_used_at = now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn upsert(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &str,
        now: OffsetDateTime,
    ) -> AuthResult<ConsentUpsert>;

    /// Refresh `last_used_at` of an existing consent.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn touch(&self, user_id: &str, client_id: &str, now: OffsetDateTime) -> AuthResult<()>;

    /// Revoke a consent. Returns `true` if a row was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke(&self, user_id: &str, client_id: &str) -> AuthResult<bool>;

    /// List a user's consents, most recently used first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_for_user(&self, user_id: &str) -> AuthResult<Vec<UserAuthorizedClient>>;
}
