//! Storage for envelope-encrypted key material and secrets.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::{EncryptedSecret, SigningKeyRecord};

/// The single live signing key.
#[async_trait]
pub trait SigningKeyStorage: Send + Sync {
    /// Load the stored key, if one has been generated.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn load(&self) -> AuthResult<Option<SigningKeyRecord>>;

    /// Store `record` as the live key, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn save(&self, record: &SigningKeyRecord) -> AuthResult<()>;
}

/// Named generic secrets.
#[async_trait]
pub trait EncryptedSecretStorage: Send + Sync {
    /// Fetch a secret by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get(&self, name: &str) -> AuthResult<Option<EncryptedSecret>>;

    /// Insert or replace a secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn put(&self, secret: &EncryptedSecret) -> AuthResult<()>;

    /// Delete a secret. Returns `true` if a row was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete(&self, name: &str) -> AuthResult<bool>;
}

/// Begins the transaction a key rotation runs in.
#[async_trait]
pub trait RotationStore: Send + Sync {
    /// Start a transaction that excludes other rotations until it ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    async fn begin(&self) -> AuthResult<Box<dyn RotationTransaction>>;
}

/// All reads and writes of one rotation. Nothing is visible before
/// [`commit`](Self::commit); dropping without committing discards everything.
#[async_trait]
pub trait RotationTransaction: Send {
    /// Load the signing key, locking it for the rest of the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn load_signing_key(&mut self) -> AuthResult<Option<SigningKeyRecord>>;

    /// Replace the signing key.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn save_signing_key(&mut self, record: &SigningKeyRecord) -> AuthResult<()>;

    /// Load every generic secret, locking them for the rest of the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_secrets(&mut self) -> AuthResult<Vec<EncryptedSecret>>;

    /// Replace one secret's ciphertext.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn update_secret(&mut self, secret: &EncryptedSecret) -> AuthResult<()>;

    /// Make every change visible at once.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is applied in that case.
    async fn commit(self: Box<Self>) -> AuthResult<()>;

    /// Discard every change.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to roll back.
    async fn rollback(self: Box<Self>) -> AuthResult<()>;
}
