//! AES-CBC + HMAC authenticated encryption (encrypt-then-MAC).
//!
//! The construction follows the `AEAD_AES_CBC_HMAC_SHA2` family: the key is
//! split into a leading MAC key and a trailing encryption key, the plaintext
//! is PKCS#7 padded and CBC encrypted under a fresh random IV, and the tag is
//! the HMAC of `IV || ciphertext || associated data`, truncated to the MAC
//! key length. Sealed output is `IV || ciphertext || tag`.
//!
//! | key | MAC key | enc key | cipher  | HMAC    | tag |
//! |-----|---------|---------|---------|---------|-----|
//! | 32  | 16      | 16      | AES-128 | SHA-256 | 16  |
//! | 48  | 24      | 24      | AES-192 | SHA-384 | 24  |
//! | 56  | 24      | 32      | AES-256 | SHA-384 | 24  |
//! | 64  | 32      | 32      | AES-256 | SHA-512 | 32  |
//!
//! Every decryption failure (short input, bad tag, bad padding) is reported
//! as the same [`CryptoError::Decrypt`].

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use hmac::Hmac;
use hmac::digest::{KeyInit, Mac};
use rand::RngCore;
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use super::CryptoError;

/// IV length; equal to the AES block size.
pub const NONCE_SIZE: usize = 16;

const BLOCK_SIZE: usize = 16;

/// Key sizes accepted by [`AeadAesCbcHmac::new`].
pub const SUPPORTED_KEY_SIZES: [usize; 4] = [32, 48, 56, 64];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockCipherKind {
    Aes128,
    Aes192,
    Aes256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacHash {
    Sha256,
    Sha384,
    Sha512,
}

/// An AES-CBC-HMAC AEAD bound to one key.
pub struct AeadAesCbcHmac {
    mac_key: Vec<u8>,
    enc_key: Vec<u8>,
    cipher: BlockCipherKind,
    hash: MacHash,
}

impl std::fmt::Debug for AeadAesCbcHmac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadAesCbcHmac")
            .field("cipher", &self.cipher)
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

impl AeadAesCbcHmac {
    /// Creates an AEAD for a 32, 48, 56 or 64 byte key.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeySize` for any other length.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let (mac_len, cipher, hash) = match key.len() {
            32 => (16, BlockCipherKind::Aes128, MacHash::Sha256),
            48 => (24, BlockCipherKind::Aes192, MacHash::Sha384),
            56 => (24, BlockCipherKind::Aes256, MacHash::Sha384),
            64 => (32, BlockCipherKind::Aes256, MacHash::Sha512),
            other => return Err(CryptoError::InvalidKeySize(other)),
        };
        let (mac_key, enc_key) = key.split_at(mac_len);
        Ok(Self {
            mac_key: mac_key.to_vec(),
            enc_key: enc_key.to_vec(),
            cipher,
            hash,
        })
    }

    /// IV length prepended to every sealed message.
    #[must_use]
    pub fn nonce_size(&self) -> usize {
        NONCE_SIZE
    }

    /// Tag length appended to every sealed message.
    #[must_use]
    pub fn overhead(&self) -> usize {
        self.mac_key.len()
    }

    /// Encrypts and authenticates `plaintext`, binding `aad`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Encrypt` if the block cipher rejects its input.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut iv = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        self.encrypt_with_iv(&iv, plaintext, aad)
    }

    fn encrypt_with_iv(
        &self,
        iv: &[u8; NONCE_SIZE],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut buf = pad_pkcs7(plaintext);
        self.cbc_encrypt(iv, &mut buf)?;

        let tag = self.tag(iv, &buf, aad)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + buf.len() + tag.len());
        out.extend_from_slice(iv);
        out.extend_from_slice(&buf);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    /// Verifies and decrypts a sealed message produced by [`Self::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Decrypt` for every failure.
    pub fn decrypt(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE + self.overhead() {
            return Err(CryptoError::Decrypt);
        }

        let (iv, rest) = sealed.split_at(NONCE_SIZE);
        let (ciphertext, tag) = rest.split_at(rest.len() - self.overhead());

        let expected = self.tag(iv, ciphertext, aad)?;
        if !bool::from(expected.ct_eq(tag)) {
            return Err(CryptoError::Decrypt);
        }

        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::Decrypt);
        }

        let mut buf = ciphertext.to_vec();
        self.cbc_decrypt(iv, &mut buf)?;
        unpad_pkcs7(&mut buf)?;
        Ok(buf)
    }

    fn tag(&self, iv: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let parts = [iv, ciphertext, aad];
        let full = match self.hash {
            MacHash::Sha256 => hmac_parts::<Hmac<Sha256>>(&self.mac_key, &parts)?,
            MacHash::Sha384 => hmac_parts::<Hmac<Sha384>>(&self.mac_key, &parts)?,
            MacHash::Sha512 => hmac_parts::<Hmac<Sha512>>(&self.mac_key, &parts)?,
        };
        Ok(full[..self.overhead()].to_vec())
    }

    fn cbc_encrypt(&self, iv: &[u8], buf: &mut [u8]) -> Result<(), CryptoError> {
        let len = buf.len();
        let key = self.enc_key.as_slice();
        let result = match self.cipher {
            BlockCipherKind::Aes128 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(|_| CryptoError::Encrypt)?
                .encrypt_padded_mut::<NoPadding>(buf, len)
                .map(|_| ()),
            BlockCipherKind::Aes192 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
                .map_err(|_| CryptoError::Encrypt)?
                .encrypt_padded_mut::<NoPadding>(buf, len)
                .map(|_| ()),
            BlockCipherKind::Aes256 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(|_| CryptoError::Encrypt)?
                .encrypt_padded_mut::<NoPadding>(buf, len)
                .map(|_| ()),
        };
        result.map_err(|_| CryptoError::Encrypt)
    }

    fn cbc_decrypt(&self, iv: &[u8], buf: &mut [u8]) -> Result<(), CryptoError> {
        let key = self.enc_key.as_slice();
        let result = match self.cipher {
            BlockCipherKind::Aes128 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(|_| CryptoError::Decrypt)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map(|_| ()),
            BlockCipherKind::Aes192 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
                .map_err(|_| CryptoError::Decrypt)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map(|_| ()),
            BlockCipherKind::Aes256 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(|_| CryptoError::Decrypt)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map(|_| ()),
        };
        result.map_err(|_| CryptoError::Decrypt)
    }
}

fn hmac_parts<M>(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, CryptoError>
where
    M: Mac + KeyInit,
{
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|_| CryptoError::Encrypt)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Encrypts `plaintext` under `key` with a fresh IV.
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeySize` for unsupported keys.
pub fn encrypt(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    AeadAesCbcHmac::new(key)?.encrypt(plaintext, aad)
}

/// Decrypts a message sealed by [`encrypt`].
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeySize` for unsupported keys and
/// `CryptoError::Decrypt` for everything else.
pub fn decrypt(key: &[u8], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    AeadAesCbcHmac::new(key)?.decrypt(sealed, aad)
}

fn pad_pkcs7(data: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

fn unpad_pkcs7(buf: &mut Vec<u8>) -> Result<(), CryptoError> {
    let Some(&last) = buf.last() else {
        return Err(CryptoError::Decrypt);
    };
    let pad = usize::from(last);
    if pad == 0 || pad > BLOCK_SIZE || pad > buf.len() {
        return Err(CryptoError::Decrypt);
    }
    let start = buf.len() - pad;
    if buf[start..].iter().any(|&b| b != last) {
        return Err(CryptoError::Decrypt);
    }
    buf.truncate(start);
    Ok(())
}
