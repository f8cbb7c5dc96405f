//! Client secret generation, hashing and comparison.
//!
//! Secrets are 256-bit random values; only their Argon2id PHC hash is stored.
//!
//! # Example
//!
//! ```
//! use pocketid_oidc::secret::{
//!     Argon2SecretComparator, SecretComparator, generate_client_secret, hash_client_secret,
//! };
//!
//! let secret = generate_client_secret();
//! let hash = hash_client_secret(&secret).unwrap();
//!
//! let comparator = Argon2SecretComparator;
//! assert!(comparator.compare(&hash, &secret));
//! assert!(!comparator.compare(&hash, "wrong"));
//! ```

use std::sync::LazyLock;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;

/// Constant-time comparison of a candidate secret against a stored hash.
///
/// Implementations are CPU-bound; async callers run them on a blocking thread.
pub trait SecretComparator: Send + Sync {
    /// Returns `true` if `candidate` hashes to `hash`.
    fn compare(&self, hash: &str, candidate: &str) -> bool;
}

/// [`SecretComparator`] for Argon2 PHC strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2SecretComparator;

impl SecretComparator for Argon2SecretComparator {
    fn compare(&self, hash: &str, candidate: &str) -> bool {
        verify_client_secret(candidate, hash).unwrap_or(false)
    }
}

static DUMMY_HASH: LazyLock<String> = LazyLock::new(|| {
    hash_client_secret(&generate_client_secret()).unwrap_or_default()
});

/// A valid hash that no presented secret matches.
///
/// Comparing against it costs the same as a real comparison, so unknown
/// clients take as long to reject as wrong secrets.
#[must_use]
pub fn dummy_hash() -> &'static str {
    DUMMY_HASH.as_str()
}

/// Generate a new client secret (32 random bytes, base64url, 43 characters).
#[must_use]
pub fn generate_client_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a client secret with Argon2id for storage.
///
/// # Errors
///
/// Returns `argon2::password_hash::Error` if hashing fails (rare).
pub fn hash_client_secret(secret: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(secret.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a client secret against a stored Argon2 hash.
///
/// # Errors
///
/// Returns `Err` only if the hash format is invalid.
pub fn verify_client_secret(
    secret: &str,
    hash: &str,
) -> Result<bool, argon2::password_hash::Error> {
    let parsed_hash = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed_hash)
        .is_ok())
}
