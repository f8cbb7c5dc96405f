//! Base64 envelopes for values stored at rest.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

use super::CryptoError;
use super::aead::AeadAesCbcHmac;
use super::kek::KeyEncryptionKey;

/// Seals and opens base64 (standard alphabet) envelopes under one KEK.
#[derive(Debug)]
pub struct SecretBox {
    aead: AeadAesCbcHmac,
}

impl SecretBox {
    /// Creates a box keyed with `kek`.
    ///
    /// # Errors
    ///
    /// Propagates key-size errors from the AEAD.
    pub fn new(kek: &KeyEncryptionKey) -> Result<Self, CryptoError> {
        Ok(Self { aead: kek.aead()? })
    }

    /// Encrypts `plaintext` and returns the base64 envelope.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Encrypt` if encryption fails.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<String, CryptoError> {
        Ok(BASE64.encode(self.aead.encrypt(plaintext, aad)?))
    }

    /// Decodes and decrypts an envelope.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Decrypt` for malformed base64 as well as for
    /// authentication failures.
    pub fn open(&self, envelope: &str, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let sealed = BASE64.decode(envelope.trim()).map_err(|_| CryptoError::Decrypt)?;
        self.aead.decrypt(&sealed, aad)
    }

    /// Like [`Self::open`], requiring UTF-8 plaintext.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Decrypt` on any failure.
    pub fn open_string(&self, envelope: &str, aad: &[u8]) -> Result<String, CryptoError> {
        String::from_utf8(self.open(envelope, aad)?).map_err(|_| CryptoError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kek::KeyPurpose;

    fn secret_box(secret: &[u8]) -> SecretBox {
        let kek = KeyEncryptionKey::derive(secret, "instance", KeyPurpose::EncryptedSecret).unwrap();
        SecretBox::new(&kek).unwrap()
    }

    #[test]
    fn test_seal_open() {
        let sb = secret_box(b"0123456789abcdef");
        let envelope = sb.seal(b"scim-token", b"scim").unwrap();
        assert!(BASE64.decode(&envelope).is_ok());
        assert_eq!(sb.open_string(&envelope, b"scim").unwrap(), "scim-token");
    }

    #[test]
    fn test_open_garbage() {
        let sb = secret_box(b"0123456789abcdef");
        assert!(matches!(sb.open("not base64!", b""), Err(CryptoError::Decrypt)));
        assert!(matches!(sb.open("AAAA", b""), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_other_key_cannot_open() {
        let envelope = secret_box(b"0123456789abcdef").seal(b"value", b"").unwrap();
        assert!(secret_box(b"fedcba9876543210").open(&envelope, b"").is_err());
    }
}
