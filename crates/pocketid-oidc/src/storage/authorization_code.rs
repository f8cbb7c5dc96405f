//! Authorization code storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::AuthorizationCode;

/// Storage for one-time authorization codes.
///
/// # Implementation Notes
///
/// [`take`](Self::take) must remove and return the row in one atomic step
/// (`DELETE ... RETURNING`, or a remove under a write lock). It is the only
/// way codes are read, so two concurrent redemptions of the same code can
/// never both observe it.
#[async_trait]
pub trait AuthorizationCodeStorage: Send + Sync {
    /// Persist a freshly issued code.
    ///
    /// # Errors
    ///
    /// Returns an error if the code already exists or the storage operation fails.
    async fn create(&self, code: &AuthorizationCode) -> AuthResult<()>;

    /// Atomically remove and return a code.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn take(&self, code: &str) -> AuthResult<Option<AuthorizationCode>>;

    /// Delete every code that expired before `now`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_expired(&self, now: OffsetDateTime) -> AuthResult<u64>;
}
