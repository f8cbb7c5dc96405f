//! JWT signing and verification.
//!
//! The server signs with exactly one key at a time, either RSA (RS256) or
//! ECDSA P-384 (ES384). Private keys travel as PKCS#8 PEM so they can be
//! envelope-encrypted at rest and loaded back without loss.
//!
//! ## Example
//!
//! ```ignore
//! use pocketid_oidc::token::jwt::{JwtService, SigningAlgorithm, SigningKeyPair};
//!
//! let key_pair = SigningKeyPair::generate(SigningAlgorithm::ES384)?;
//! let jwt_service = JwtService::new(key_pair, "https://id.example.com");
//!
//! let token = jwt_service.encode(&claims)?;
//! let token_data = jwt_service.decode::<IdTokenClaims>(&token)?;
//! ```

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },

    /// Failed to generate a cryptographic key.
    #[error("Key generation error: {message}")]
    KeyGenerationError {
        /// Description of the key generation error.
        message: String,
    },

    /// Invalid key format or data, or an unsupported algorithm.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },
}

impl JwtError {
    /// Creates a new `EncodingError`.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a new `DecodingError`.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims` error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a new `KeyGenerationError`.
    #[must_use]
    pub fn key_generation_error(message: impl Into<String>) -> Self {
        Self::KeyGenerationError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm => Self::decoding_error(err.to_string()),
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    /// RSA 2048 with SHA-256.
    RS256,
    /// ECDSA with the P-384 curve.
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Returns the algorithm name as used in JWK/JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::ES384 => "ES384",
        }
    }
}

impl FromStr for SigningAlgorithm {
    type Err = JwtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::RS256),
            "ES384" => Ok(Self::ES384),
            other => Err(JwtError::invalid_key(format!(
                "unsupported signing algorithm '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Token Claims
// ============================================================================

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject (user ID).
    pub sub: String,

    /// Audience (client ID).
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// JWT ID.
    pub jti: String,
}

/// ID token claims for OpenID Connect.
///
/// `sub` and every scope-derived claim live in `claims`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Audience (client ID first).
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Nonce from authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// User claims assembled for the granted scope.
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl IdTokenClaims {
    /// The `sub` claim, if present.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub").and_then(Value::as_str)
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use ("sig" for signing).
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    // RSA-specific fields
    /// RSA modulus (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    // EC-specific fields
    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// A signing key pair together with its PKCS#8 serialization.
pub struct SigningKeyPair {
    /// Key ID.
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,
    private_pem: String,
}

enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKeyPair {
    /// Generates a fresh key for `algorithm` with a random key ID.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        let kid = uuid::Uuid::new_v4().to_string();
        match algorithm {
            SigningAlgorithm::RS256 => {
                let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
                    .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
                Self::from_rsa(kid, &private_key)
            }
            SigningAlgorithm::ES384 => Self::from_ec(kid, &EcSecretKey::random(&mut OsRng)),
        }
    }

    /// Loads a key pair from a PKCS#8 PEM private key.
    ///
    /// # Errors
    /// Returns `JwtError::InvalidKey` if the PEM does not hold a key for `algorithm`.
    pub fn from_pkcs8_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
    ) -> Result<Self, JwtError> {
        match algorithm {
            SigningAlgorithm::RS256 => {
                let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
                    .map_err(|e| JwtError::invalid_key(e.to_string()))?;
                Self::from_rsa(kid.into(), &private_key)
            }
            SigningAlgorithm::ES384 => {
                let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                    .map_err(|e| JwtError::invalid_key(e.to_string()))?;
                Self::from_ec(kid.into(), &secret_key)
            }
        }
    }

    fn from_rsa(kid: String, private_key: &RsaPrivateKey) -> Result<Self, JwtError> {
        let public_key = private_key.to_public_key();
        let n = public_key.n().to_bytes_be();
        let e = public_key.e().to_bytes_be();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let decoding_key =
            DecodingKey::from_rsa_components(&URL_SAFE_NO_PAD.encode(&n), &URL_SAFE_NO_PAD.encode(&e))
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Ok(Self {
            kid,
            algorithm: SigningAlgorithm::RS256,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Rsa { n, e },
            private_pem: private_pem.to_string(),
        })
    }

    fn from_ec(kid: String, secret_key: &EcSecretKey) -> Result<Self, JwtError> {
        let signing_key = EcSigningKey::from(secret_key);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| JwtError::invalid_key("Missing x coordinate"))?;
        let y = point
            .y()
            .ok_or_else(|| JwtError::invalid_key("Missing y coordinate"))?;

        // jsonwebtoken only accepts PKCS#8 for EC private keys
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let decoding_key = DecodingKey::from_ec_components(
            &URL_SAFE_NO_PAD.encode(x.as_slice()),
            &URL_SAFE_NO_PAD.encode(y.as_slice()),
        )
        .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Ok(Self {
            kid,
            algorithm: SigningAlgorithm::ES384,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Ec {
                x: x.to_vec(),
                y: y.to_vec(),
            },
            private_pem: private_pem.to_string(),
        })
    }

    /// PKCS#8 PEM of the private key. Only ever persisted encrypted.
    #[must_use]
    pub fn private_key_pem(&self) -> &str {
        &self.private_pem
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => Jwk {
                kty: "RSA".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                crv: None,
                x: None,
                y: None,
            },
            PublicKeyData::Ec { x, y } => Jwk {
                kty: "EC".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: None,
                e: None,
                crv: Some("P-384".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
            },
        }
    }
}

// ============================================================================
// JWT Service
// ============================================================================

/// Encodes and decodes JWTs with one key pair.
///
/// This service is thread-safe (`Send + Sync`) and can be shared across
/// async tasks.
#[derive(Debug)]
pub struct JwtService {
    signing_key: SigningKeyPair,
    issuer: String,
}

impl JwtService {
    /// Creates a new JWT service.
    #[must_use]
    pub fn new(signing_key: SigningKeyPair, issuer: impl Into<String>) -> Self {
        Self {
            signing_key,
            issuer: issuer.into(),
        }
    }

    /// Encodes claims into a JWT string.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = Some(self.signing_key.kid.clone());

        encode(&header, claims, &self.signing_key.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    /// Decodes and validates a JWT string.
    ///
    /// # Errors
    /// Returns an error if decoding or validation fails.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<TokenData<T>, JwtError> {
        self.decode_with(token, true)
    }

    /// Decodes a JWT without validating expiration.
    ///
    /// # Errors
    /// Returns an error if decoding fails (signature and issuer are still validated).
    pub fn decode_allow_expired<T: DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<TokenData<T>, JwtError> {
        self.decode_with(token, false)
    }

    fn decode_with<T: DeserializeOwned>(
        &self,
        token: &str,
        validate_exp: bool,
    ) -> Result<TokenData<T>, JwtError> {
        let mut validation = Validation::new(self.signing_key.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = validate_exp;
        validation.validate_aud = false; // Audience validated by the caller

        decode(token, &self.signing_key.decoding_key, &validation).map_err(JwtError::from)
    }

    /// Returns the current signing key ID.
    #[must_use]
    pub fn current_kid(&self) -> &str {
        &self.signing_key.kid
    }

    /// Returns the signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.signing_key.algorithm
    }

    /// Returns the issuer URL.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the JWKS containing the public key.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: vec![self.signing_key.to_jwk()],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
