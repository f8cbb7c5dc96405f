//! Named secrets encrypted under the `encrypted-secret` KEK.

use std::sync::Arc;

use time::OffsetDateTime;

use super::kek::{KeyEncryptionKey, KeyPurpose};
use super::secret_box::SecretBox;
use crate::storage::EncryptedSecretStorage;
use crate::types::EncryptedSecret;
use crate::{AuthError, AuthResult};

/// Stores and retrieves generic secrets (SCIM tokens, SMTP passwords, ...).
///
/// Each secret's name is bound as associated data, so a ciphertext copied
/// under another name does not open.
pub struct SecretVault {
    storage: Arc<dyn EncryptedSecretStorage>,
    sealer: SecretBox,
}

impl SecretVault {
    /// Creates a vault over `storage`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if `kek` was derived for another purpose.
    pub fn new(
        storage: Arc<dyn EncryptedSecretStorage>,
        kek: &KeyEncryptionKey,
        purpose: KeyPurpose,
    ) -> AuthResult<Self> {
        if purpose != KeyPurpose::EncryptedSecret {
            return Err(AuthError::configuration(
                "secret vault requires the encrypted-secret key",
            ));
        }
        Ok(Self {
            storage,
            sealer: SecretBox::new(kek)?,
        })
    }

    /// Encrypts and stores `value` under `name`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or storage fails.
    pub async fn store(&self, name: &str, value: &[u8]) -> AuthResult<()> {
        let ciphertext = self.sealer.seal(value, name.as_bytes())?;
        self.storage
            .put(&EncryptedSecret {
                name: name.to_string(),
                ciphertext,
                updated_at: OffsetDateTime::now_utc(),
            })
            .await
    }

    /// Loads and decrypts the secret named `name`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Crypto` if the stored value does not authenticate.
    pub async fn load(&self, name: &str) -> AuthResult<Option<Vec<u8>>> {
        match self.storage.get(name).await? {
            Some(secret) => Ok(Some(self.sealer.open(&secret.ciphertext, name.as_bytes())?)),
            None => Ok(None),
        }
    }

    /// Removes a secret. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn remove(&self, name: &str) -> AuthResult<bool> {
        self.storage.delete(name).await
    }
}

impl std::fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretVault").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    fn vault(store: &InMemoryStore, secret: &[u8]) -> SecretVault {
        let kek = KeyEncryptionKey::derive(secret, "instance", KeyPurpose::EncryptedSecret).unwrap();
        SecretVault::new(Arc::new(store.clone()), &kek, KeyPurpose::EncryptedSecret).unwrap()
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let store = InMemoryStore::new();
        let vault = vault(&store, b"0123456789abcdef");

        vault.store("smtp", b"hunter2").await.unwrap();
        assert_eq!(vault.load("smtp").await.unwrap().unwrap(), b"hunter2");
        assert!(vault.load("missing").await.unwrap().is_none());

        let raw = store.get("smtp").await.unwrap().unwrap();
        assert!(!raw.ciphertext.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_name_is_bound() {
        let store = InMemoryStore::new();
        let vault = vault(&store, b"0123456789abcdef");
        vault.store("smtp", b"hunter2").await.unwrap();

        let mut moved = store.get("smtp").await.unwrap().unwrap();
        moved.name = "scim".to_string();
        store.put(&moved).await.unwrap();
        assert!(matches!(vault.load("scim").await, Err(AuthError::Crypto)));
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        let store = InMemoryStore::new();
        vault(&store, b"0123456789abcdef").store("smtp", b"x").await.unwrap();
        let other = vault(&store, b"fedcba9876543210");
        assert!(matches!(other.load("smtp").await, Err(AuthError::Crypto)));
    }

    #[test]
    fn test_rejects_signing_purpose() {
        let kek = KeyEncryptionKey::derive(b"0123456789abcdef", "i", KeyPurpose::SigningKey).unwrap();
        let store = InMemoryStore::new();
        assert!(SecretVault::new(Arc::new(store), &kek, KeyPurpose::SigningKey).is_err());
    }
}
