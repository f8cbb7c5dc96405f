//! Envelope encryption for key material and other at-rest secrets.
//!
//! - [`aead`]: AES-CBC + HMAC authenticated encryption
//! - [`kek`]: key-encryption-key derivation from the operator secret
//! - [`secret_box`]: base64 envelopes used by the storage layer
//! - [`vault`]: named generic secrets on top of [`crate::storage::EncryptedSecretStorage`]

pub mod aead;
pub mod kek;
pub mod secret_box;
pub mod vault;

pub use aead::AeadAesCbcHmac;
pub use kek::{KeyEncryptionKey, KeyPurpose, MIN_SECRET_LEN};
pub use secret_box::SecretBox;
pub use vault::SecretVault;

/// Errors from the key encryption layer.
///
/// Decryption failures are intentionally a single variant so that callers
/// cannot tell a bad tag from bad padding.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The key length does not select a supported AEAD.
    #[error("unsupported key size: {0} bytes")]
    InvalidKeySize(usize),

    /// The operator secret or instance ID cannot be used for derivation.
    #[error("invalid encryption secret: {0}")]
    InvalidSecret(String),

    /// Encryption failed.
    #[error("encryption failed")]
    Encrypt,

    /// Decryption or authentication failed.
    #[error("decryption failed")]
    Decrypt,
}
