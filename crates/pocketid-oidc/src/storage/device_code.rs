//! Device code storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::types::DeviceCode;

/// Storage for Device Authorization Grant rows.
///
/// # Implementation Notes
///
/// - `record_poll` is a compare-and-set on `last_poll_time`.
/// - `take_authorized` removes and returns the row in one atomic step, and
///   only if it is authorized and unexpired at `now`.
#[async_trait]
pub trait DeviceCodeStorage: Send + Sync {
    /// Persist a new device authorization.
    ///
    /// # Errors
    ///
    /// Returns an error if a code collides or the storage operation fails.
    async fn create(&self, device_code: &DeviceCode) -> AuthResult<()>;

    /// Find a row by the human-entered user code.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_user_code(&self, user_code: &str) -> AuthResult<Option<DeviceCode>>;

    /// Find a row by device code, scoped to the polling client.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> AuthResult<Option<DeviceCode>>;

    /// Mark the row authorized by `user_id` if it is still unexpired at `now`.
    /// Returns `false` if no such row exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn authorize(
        &self,
        user_code: &str,
        user_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<bool>;

    /// Set `last_poll_time` to `now` if it still equals `expected`.
    /// Returns `false` when another poll won the race.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn record_poll(
        &self,
        device_code: &str,
        expected: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> AuthResult<bool>;

    /// Atomically remove and return an authorized, unexpired row.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn take_authorized(
        &self,
        device_code: &str,
        client_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<DeviceCode>>;

    /// Delete every row that expired before `now`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_expired(&self, now: OffsetDateTime) -> AuthResult<u64>;
}
