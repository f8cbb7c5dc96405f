//! Key-encryption-key derivation.
//!
//! `KEK = HMAC-SHA3-256(key = operator secret, msg = "pocketid/" + instance_id + "/" + purpose)`.
//! Binding the instance ID means a leaked database cannot be opened by
//! another installation that happens to share the operator secret.

use hmac::Hmac;
use hmac::digest::{KeyInit, Mac};
use sha3::Sha3_256;

use super::CryptoError;
use super::aead::AeadAesCbcHmac;

/// Minimum length of an operator encryption secret.
pub const MIN_SECRET_LEN: usize = 16;

/// What a derived key protects. Each purpose yields an independent key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// The server's private signing key.
    SigningKey,
    /// Generic at-rest secrets.
    EncryptedSecret,
}

impl KeyPurpose {
    /// Label appended to the derivation message.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::SigningKey => "jwt-kek",
            Self::EncryptedSecret => "encrypted-secret",
        }
    }
}

/// A derived 32-byte key encryption key (AES-128 + HMAC-SHA-256 AEAD).
#[derive(Clone, PartialEq, Eq)]
pub struct KeyEncryptionKey([u8; 32]);

impl std::fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyEncryptionKey(..)")
    }
}

impl KeyEncryptionKey {
    /// Derives the KEK for `purpose` from the operator secret and instance ID.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidSecret` when the secret or instance ID is empty.
    pub fn derive(
        operator_secret: &[u8],
        instance_id: &str,
        purpose: KeyPurpose,
    ) -> Result<Self, CryptoError> {
        if operator_secret.is_empty() {
            return Err(CryptoError::InvalidSecret("encryption key is empty".to_string()));
        }
        if instance_id.is_empty() {
            return Err(CryptoError::InvalidSecret("instance ID is empty".to_string()));
        }

        let mut mac = <Hmac<Sha3_256> as KeyInit>::new_from_slice(operator_secret)
            .map_err(|_| CryptoError::InvalidSecret("encryption key rejected".to_string()))?;
        mac.update(b"pocketid/");
        mac.update(instance_id.as_bytes());
        mac.update(b"/");
        mac.update(purpose.label().as_bytes());

        let mut key = [0u8; 32];
        key.copy_from_slice(&mac.finalize().into_bytes());
        Ok(Self(key))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The AEAD keyed with this KEK.
    ///
    /// # Errors
    ///
    /// Never fails for a derived key; the signature follows [`AeadAesCbcHmac::new`].
    pub fn aead(&self) -> Result<AeadAesCbcHmac, CryptoError> {
        AeadAesCbcHmac::new(&self.0)
    }
}
