//! PKCE (Proof Key for Code Exchange) implementation.
//!
//! Implements RFC 7636 with both the `S256` and `plain` methods. Whether PKCE
//! is mandatory is decided by the caller: it is required for every public
//! client and for confidential clients that opted in.
//!
//! # Example
//!
//! ```
//! use pocketid_oidc::oauth::pkce::{
//!     PkceChallenge, PkceChallengeMethod, PkceVerifier, validate_code_verifier,
//! };
//!
//! // Client generates a verifier and challenge
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier);
//!
//! // Server stores the challenge, later verifies the verifier from the token request
//! assert!(validate_code_verifier(
//!     verifier.as_str(),
//!     challenge.as_str(),
//!     PkceChallengeMethod::S256,
//! ));
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during PKCE operations.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside the valid range (43-128 characters).
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains invalid characters.
    #[error("Invalid verifier characters: must be unreserved ([A-Za-z0-9-._~])")]
    InvalidVerifierCharacters,

    /// Unsupported challenge method.
    #[error("Unsupported challenge method: {0}")]
    UnsupportedMethod(String),
}

impl PkceError {
    /// Get the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        "invalid_request"
    }
}

impl From<PkceError> for crate::AuthError {
    fn from(err: PkceError) -> Self {
        Self::invalid_request(err.to_string())
    }
}

// =============================================================================
// PKCE Challenge Method
// =============================================================================

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PkceChallengeMethod {
    /// The challenge is the verifier itself.
    #[default]
    #[serde(rename = "plain")]
    Plain,
    /// The challenge is `BASE64URL(SHA256(verifier))`.
    #[serde(rename = "S256")]
    S256,
}

impl PkceChallengeMethod {
    /// Parse the `code_challenge_method` request parameter.
    ///
    /// An absent (empty) method means `plain`, per RFC 7636 §4.3. `S256` is
    /// matched case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnsupportedMethod` for any other value.
    pub fn parse(method: &str) -> Result<Self, PkceError> {
        if method.is_empty() || method == "plain" {
            Ok(Self::Plain)
        } else if method.eq_ignore_ascii_case("S256") {
            Ok(Self::S256)
        } else {
            Err(PkceError::UnsupportedMethod(method.to_string()))
        }
    }

    /// Get the method as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }

    /// Returns `true` for `S256`.
    #[must_use]
    pub fn is_s256(&self) -> bool {
        matches!(self, Self::S256)
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Verification
// =============================================================================

/// Verifies a `code_verifier` against the stored challenge.
///
/// Empty verifiers and empty challenges never validate. Comparisons are
/// constant time.
#[must_use]
pub fn validate_code_verifier(verifier: &str, challenge: &str, method: PkceChallengeMethod) -> bool {
    if verifier.is_empty() || challenge.is_empty() {
        return false;
    }

    match method {
        PkceChallengeMethod::Plain => verifier.as_bytes().ct_eq(challenge.as_bytes()).into(),
        PkceChallengeMethod::S256 => s256(verifier).as_bytes().ct_eq(challenge.as_bytes()).into(),
    }
}

fn s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

// =============================================================================
// PKCE Verifier
// =============================================================================

/// PKCE code verifier, as created by a client.
///
/// A high-entropy random string using the unreserved characters
/// `[A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"`, 43 to 128 characters long.
#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Create a new verifier from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Length is not between 43 and 128 characters
    /// - Contains characters other than `[A-Za-z0-9-._~]`
    pub fn new(verifier: String) -> Result<Self, PkceError> {
        let len = verifier.len();

        if !(43..=128).contains(&len) {
            return Err(PkceError::InvalidVerifierLength(len));
        }

        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(PkceError::InvalidVerifierCharacters);
        }

        Ok(Self(verifier))
    }

    /// Generate a cryptographically random verifier.
    ///
    /// 32 random bytes, base64url encoded (43 characters).
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let bytes: [u8; 32] = rand::thread_rng().r#gen();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Get the verifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// PKCE Challenge
// =============================================================================

/// An S256 code challenge derived from a verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Computes `BASE64URL(SHA256(ASCII(code_verifier)))`.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        Self(s256(&verifier.0))
    }

    /// Get the challenge as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_rfc7636_test_vector() {
        assert!(validate_code_verifier(
            RFC_VERIFIER,
            RFC_CHALLENGE,
            PkceChallengeMethod::S256
        ));
        let verifier = PkceVerifier::new(RFC_VERIFIER.to_string()).unwrap();
        assert_eq!(PkceChallenge::from_verifier(&verifier).as_str(), RFC_CHALLENGE);
    }

    #[test]
    fn test_s256_round_trip_for_generated_verifiers() {
        for _ in 0..16 {
            let verifier = PkceVerifier::generate();
            let challenge = PkceChallenge::from_verifier(&verifier);
            assert!(validate_code_verifier(
                verifier.as_str(),
                challenge.as_str(),
                PkceChallengeMethod::S256
            ));
        }
    }

    #[test]
    fn test_s256_other_verifier_fails() {
        let v1 = PkceVerifier::generate();
        let v2 = PkceVerifier::generate();
        let challenge = PkceChallenge::from_verifier(&v1);
        assert!(!validate_code_verifier(
            v2.as_str(),
            challenge.as_str(),
            PkceChallengeMethod::S256
        ));
    }

    #[test]
    fn test_s256_does_not_accept_verifier_as_challenge() {
        assert!(!validate_code_verifier(
            RFC_VERIFIER,
            RFC_VERIFIER,
            PkceChallengeMethod::S256
        ));
    }

    #[test]
    fn test_plain_is_exact_equality() {
        assert!(validate_code_verifier(
            "verifier-abc",
            "verifier-abc",
            PkceChallengeMethod::Plain
        ));
        assert!(!validate_code_verifier(
            "verifier-abc",
            "verifier-abC",
            PkceChallengeMethod::Plain
        ));
        assert!(!validate_code_verifier(
            "verifier-abc",
            "verifier-ab",
            PkceChallengeMethod::Plain
        ));
    }

    #[test]
    fn test_empty_inputs_fail() {
        for method in [PkceChallengeMethod::Plain, PkceChallengeMethod::S256] {
            assert!(!validate_code_verifier("", "", method));
            assert!(!validate_code_verifier("", RFC_CHALLENGE, method));
            assert!(!validate_code_verifier(RFC_VERIFIER, "", method));
        }
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(PkceChallengeMethod::parse("S256").unwrap(), PkceChallengeMethod::S256);
        assert_eq!(PkceChallengeMethod::parse("s256").unwrap(), PkceChallengeMethod::S256);
        assert_eq!(PkceChallengeMethod::parse("plain").unwrap(), PkceChallengeMethod::Plain);
        assert_eq!(PkceChallengeMethod::parse("").unwrap(), PkceChallengeMethod::Plain);

        let err = PkceChallengeMethod::parse("S512").unwrap_err();
        assert!(matches!(err, PkceError::UnsupportedMethod(_)));
        assert_eq!(err.oauth_error_code(), "invalid_request");
    }

    #[test]
    fn test_method_serde_names() {
        assert_eq!(
            serde_json::to_string(&PkceChallengeMethod::S256).unwrap(),
            "\"S256\""
        );
        let plain: PkceChallengeMethod = serde_json::from_str("\"plain\"").unwrap();
        assert_eq!(plain, PkceChallengeMethod::Plain);
    }

    #[test]
    fn test_verifier_length_bounds() {
        assert!(matches!(
            PkceVerifier::new("a".repeat(42)),
            Err(PkceError::InvalidVerifierLength(42))
        ));
        assert!(PkceVerifier::new("a".repeat(43)).is_ok());
        assert!(PkceVerifier::new("a".repeat(128)).is_ok());
        assert!(matches!(
            PkceVerifier::new("a".repeat(129)),
            Err(PkceError::InvalidVerifierLength(129))
        ));
    }

    #[test]
    fn test_verifier_characters() {
        let valid = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-._~"
            .chars()
            .cycle()
            .take(64)
            .collect::<String>();
        assert!(PkceVerifier::new(valid).is_ok());

        let invalid = "abcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()".to_string();
        assert!(matches!(
            PkceVerifier::new(invalid),
            Err(PkceError::InvalidVerifierCharacters)
        ));
    }

    #[test]
    fn test_generated_verifier_shape() {
        let verifier = PkceVerifier::generate();
        assert_eq!(verifier.as_str().len(), 43);
        assert!(PkceVerifier::new(verifier.as_str().to_string()).is_ok());
        assert_ne!(verifier.as_str(), PkceVerifier::generate().as_str());
    }
}
