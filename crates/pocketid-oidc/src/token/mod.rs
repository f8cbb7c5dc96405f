//! Token minting.
//!
//! - [`jwt`]: key pairs, claim sets and JWT encoding
//! - [`keys`]: the encrypted signing key's lifecycle and the [`TokenSigner`] seam

pub mod jwt;
pub mod keys;

pub use jwt::{
    AccessTokenClaims, IdTokenClaims, Jwk, Jwks, JwtError, JwtService, SigningAlgorithm,
    SigningKeyPair,
};
pub use keys::{SigningKeyManager, TokenSigner};
