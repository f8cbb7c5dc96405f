//! Operator-triggered rotation of the encryption key.
//!
//! Re-encrypts the signing key and every generic secret from the old
//! operator secret to the new one inside a single storage transaction. The
//! keys themselves do not change; only their envelopes do.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::crypto::{KeyEncryptionKey, KeyPurpose, MIN_SECRET_LEN, SecretBox};
use crate::storage::{RotationStore, RotationTransaction};
use crate::{AuthError, AuthResult};

/// Outcome of a successful rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationReport {
    /// Whether a signing key was stored and re-encrypted.
    pub signing_key_rotated: bool,
    /// Number of generic secrets re-encrypted.
    pub secrets_reencrypted: usize,
}

/// Old and new envelopes for one key purpose.
struct Rewrap {
    old: SecretBox,
    new: SecretBox,
}

impl Rewrap {
    fn derive(old: &[u8], new: &[u8], instance_id: &str, purpose: KeyPurpose) -> AuthResult<Self> {
        Ok(Self {
            old: SecretBox::new(&KeyEncryptionKey::derive(old, instance_id, purpose)?)?,
            new: SecretBox::new(&KeyEncryptionKey::derive(new, instance_id, purpose)?)?,
        })
    }

    fn apply(&self, envelope: &str, aad: &[u8]) -> AuthResult<String> {
        let plaintext = self.old.open(envelope, aad)?;
        Ok(self.new.seal(&plaintext, aad)?)
    }
}

/// Rotates the operator encryption key.
pub struct EncryptionKeyRotator {
    store: Arc<dyn RotationStore>,
    instance_id: String,
    running: Mutex<()>,
}

impl EncryptionKeyRotator {
    /// Creates a rotator for the installation `instance_id`.
    #[must_use]
    pub fn new(store: Arc<dyn RotationStore>, instance_id: impl Into<String>) -> Self {
        Self {
            store,
            instance_id: instance_id.into(),
            running: Mutex::new(()),
        }
    }

    /// Re-encrypts all key material from `old_secret` to `new_secret`.
    ///
    /// Either everything is re-encrypted or nothing is.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the new secret is too short or equals the old one
    /// - `Internal` if any record fails to re-encrypt; the transaction is
    ///   rolled back
    pub async fn rotate(&self, old_secret: &[u8], new_secret: &[u8]) -> AuthResult<RotationReport> {
        if new_secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::invalid_request(format!(
                "new encryption key must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if old_secret == new_secret {
            return Err(AuthError::invalid_request(
                "new encryption key must differ from the current one",
            ));
        }

        let signing =
            Rewrap::derive(old_secret, new_secret, &self.instance_id, KeyPurpose::SigningKey)?;
        let secrets = Rewrap::derive(
            old_secret,
            new_secret,
            &self.instance_id,
            KeyPurpose::EncryptedSecret,
        )?;

        let _running = self.running.lock().await;
        tracing::info!(instance_id = %self.instance_id, "starting encryption key rotation");

        let mut tx = self.store.begin().await?;
        match rewrap_all(tx.as_mut(), &signing, &secrets).await {
            Ok(report) => {
                tx.commit().await?;
                tracing::info!(
                    signing_key_rotated = report.signing_key_rotated,
                    secrets_reencrypted = report.secrets_reencrypted,
                    "encryption key rotation committed"
                );
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(error = %rollback, "rollback of encryption key rotation failed");
                }
                tracing::warn!(error = %err, "encryption key rotation rolled back");
                Err(AuthError::internal(format!(
                    "encryption key rotation rolled back: {err}"
                )))
            }
        }
    }
}

impl std::fmt::Debug for EncryptionKeyRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKeyRotator")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

async fn rewrap_all(
    tx: &mut dyn RotationTransaction,
    signing: &Rewrap,
    secrets: &Rewrap,
) -> AuthResult<RotationReport> {
    let mut report = RotationReport::default();

    if let Some(mut record) = tx.load_signing_key().await? {
        record.ciphertext = signing
            .apply(&record.ciphertext, record.kid.as_bytes())
            .map_err(|_| {
                AuthError::configuration("the signing key does not decrypt with the old encryption key")
            })?;
        tx.save_signing_key(&record).await?;
        report.signing_key_rotated = true;
    }

    for mut secret in tx.list_secrets().await? {
        secret.ciphertext = secrets
            .apply(&secret.ciphertext, secret.name.as_bytes())
            .map_err(|_| {
                AuthError::configuration(format!(
                    "secret {:?} does not decrypt with the old encryption key",
                    secret.name
                ))
            })?;
        secret.updated_at = OffsetDateTime::now_utc();
        tx.update_secret(&secret).await?;
        report.secrets_reencrypted += 1;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OidcConfig;
    use crate::crypto::SecretVault;
    use crate::storage::{EncryptedSecretStorage, InMemoryStore, SigningKeyStorage};
    use crate::token::{SigningAlgorithm, SigningKeyManager};
    use crate::types::EncryptedSecret;

    const OLD: &[u8] = b"old-operator-secret";
    const NEW: &[u8] = b"new-operator-secret";
    const INSTANCE: &str = "inst-1";

    fn kek(secret: &[u8], purpose: KeyPurpose) -> KeyEncryptionKey {
        KeyEncryptionKey::derive(secret, INSTANCE, purpose).unwrap()
    }

    fn vault(store: &InMemoryStore, secret: &[u8]) -> SecretVault {
        SecretVault::new(
            Arc::new(store.clone()),
            &kek(secret, KeyPurpose::EncryptedSecret),
            KeyPurpose::EncryptedSecret,
        )
        .unwrap()
    }

    async fn seeded() -> (InMemoryStore, String) {
        let store = InMemoryStore::new();
        let config = OidcConfig {
            app_url: "https://id.example.com".to_string(),
            ..OidcConfig::default()
        };
        let manager = SigningKeyManager::load_or_generate(
            &store,
            &kek(OLD, KeyPurpose::SigningKey),
            SigningAlgorithm::ES384,
            &config,
        )
        .await
        .unwrap();

        let old_vault = vault(&store, OLD);
        old_vault.store("scim-token", b"tok-1").await.unwrap();
        old_vault.store("smtp-password", b"hunter2").await.unwrap();

        (store, manager.current_kid())
    }

    #[tokio::test]
    async fn test_rotation_rewraps_everything() {
        let (store, kid) = seeded().await;
        let rotator = EncryptionKeyRotator::new(Arc::new(store.clone()), INSTANCE);

        let report = rotator.rotate(OLD, NEW).await.unwrap();
        assert_eq!(
            report,
            RotationReport {
                signing_key_rotated: true,
                secrets_reencrypted: 2,
            }
        );

        let config = OidcConfig {
            app_url: "https://id.example.com".to_string(),
            ..OidcConfig::default()
        };
        let reloaded = SigningKeyManager::load_or_generate(
            &store,
            &kek(NEW, KeyPurpose::SigningKey),
            SigningAlgorithm::ES384,
            &config,
        )
        .await
        .unwrap();
        assert_eq!(reloaded.current_kid(), kid);

        let err = SigningKeyManager::load_or_generate(
            &store,
            &kek(OLD, KeyPurpose::SigningKey),
            SigningAlgorithm::ES384,
            &config,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));

        let new_vault = vault(&store, NEW);
        assert_eq!(new_vault.load("scim-token").await.unwrap().unwrap(), b"tok-1");
        assert_eq!(new_vault.load("smtp-password").await.unwrap().unwrap(), b"hunter2");
        assert!(vault(&store, OLD).load("scim-token").await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_old_secret_rolls_back() {
        let (store, _) = seeded().await;
        let before = SigningKeyStorage::load(&store).await.unwrap().unwrap();
        let rotator = EncryptionKeyRotator::new(Arc::new(store.clone()), INSTANCE);

        let err = rotator.rotate(b"not-the-old-secret", NEW).await.unwrap_err();
        assert!(matches!(err, AuthError::Internal { .. }));

        let after = SigningKeyStorage::load(&store).await.unwrap().unwrap();
        assert_eq!(before.ciphertext, after.ciphertext);
        assert_eq!(vault(&store, OLD).load("scim-token").await.unwrap().unwrap(), b"tok-1");
    }

    #[tokio::test]
    async fn test_one_bad_secret_rolls_back_the_signing_key() {
        let (store, _) = seeded().await;
        let before = SigningKeyStorage::load(&store).await.unwrap().unwrap();
        store
            .put(&EncryptedSecret {
                name: "corrupt".to_string(),
                ciphertext: "AAAA".to_string(),
                updated_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();

        let rotator = EncryptionKeyRotator::new(Arc::new(store.clone()), INSTANCE);
        assert!(rotator.rotate(OLD, NEW).await.is_err());

        let after = SigningKeyStorage::load(&store).await.unwrap().unwrap();
        assert_eq!(before.ciphertext, after.ciphertext);
    }

    #[tokio::test]
    async fn test_rejects_weak_or_unchanged_secret() {
        let rotator = EncryptionKeyRotator::new(Arc::new(InMemoryStore::new()), INSTANCE);

        let err = rotator.rotate(OLD, b"short").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest { .. }));

        let err = rotator.rotate(OLD, OLD).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_empty_store() {
        let rotator = EncryptionKeyRotator::new(Arc::new(InMemoryStore::new()), INSTANCE);
        assert_eq!(rotator.rotate(OLD, NEW).await.unwrap(), RotationReport::default());
    }
}
