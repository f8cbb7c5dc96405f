//! Storage traits for authorization-server data.
//!
//! This module defines storage interfaces for:
//!
//! - client registrations
//! - authorization codes and device codes
//! - user consent
//! - the encrypted signing key and generic secrets (and their rotation)
//! - read-only user directory access
//!
//! # Implementations
//!
//! - [`memory::InMemoryStore`] - in-process backend for tests and embedding
//! - `pocketid-oidc-postgres` - PostgreSQL storage backend

pub mod authorization_code;
pub mod client;
pub mod consent;
pub mod device_code;
pub mod key_material;
pub mod memory;
pub mod user;

use std::future::Future;
use std::time::Duration;

pub use authorization_code::AuthorizationCodeStorage;
pub use client::ClientStorage;
pub use consent::ConsentStorage;
pub use device_code::DeviceCodeStorage;
pub use key_material::{
    EncryptedSecretStorage, RotationStore, RotationTransaction, SigningKeyStorage,
};
pub use memory::InMemoryStore;
pub use user::UserDirectory;

use crate::{AuthError, AuthResult};

/// Runs a storage call under a deadline.
///
/// A call that does not finish in time is abandoned and reported as a
/// retryable `AuthError::Storage`.
///
/// # Errors
///
/// Returns the call's own error, or `AuthError::Storage` on timeout.
pub async fn with_deadline<T, F>(timeout: Duration, call: F) -> AuthResult<T>
where
    F: Future<Output = AuthResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "storage call timed out");
            Err(AuthError::storage("operation timed out"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_deadline_passes_result_through() {
        let value = with_deadline(Duration::from_secs(1), async { Ok::<_, AuthError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err = with_deadline(Duration::from_secs(1), async {
            Err::<(), _>(AuthError::invalid_grant("nope"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_times_out() {
        let err = with_deadline(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, AuthError>(())
        })
        .await
        .unwrap_err();
        assert!(err.is_retryable());
    }
}
