//! At-rest records for envelope-encrypted material.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The encrypted server signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    /// Key ID published in the JWKS and JWT headers.
    pub kid: String,
    /// JWS algorithm (`RS256`, `ES384`).
    pub algorithm: String,
    /// Base64 envelope of the PKCS#8 PEM private key; the `kid` is the associated data.
    pub ciphertext: String,
    /// When the key was generated.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A generic named secret stored as a base64 envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    /// Unique name; also the associated data.
    pub name: String,
    /// Base64 envelope.
    pub ciphertext: String,
    /// Last (re-)encryption time.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
