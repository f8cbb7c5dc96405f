//! Signing key lifecycle.
//!
//! The server has exactly one live signing key. Its PKCS#8 PEM is stored only
//! as an envelope encrypted under the `jwt-kek` KEK, with the key ID bound as
//! associated data. [`SigningKeyManager`] loads it at start-up (generating it
//! on first run) and shares the decoded key lock-free through an `ArcSwap`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::{OidcConfig, TokenConfig, expiry};
use crate::crypto::{KeyEncryptionKey, SecretBox};
use crate::storage::SigningKeyStorage;
use crate::token::jwt::{
    AccessTokenClaims, IdTokenClaims, JwtError, JwtService, Jwks, SigningAlgorithm, SigningKeyPair,
};
use crate::types::SigningKeyRecord;
use crate::{AuthError, AuthResult};

/// Mints signed tokens for the token endpoint.
#[async_trait]
pub trait TokenSigner: Send + Sync {
    /// Signs an ID token carrying `claims` for `audience`.
    ///
    /// An empty `nonce` is omitted from the token.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    async fn sign_id_token(
        &self,
        claims: &Map<String, Value>,
        audience: &str,
        nonce: Option<&str>,
    ) -> AuthResult<String>;

    /// Signs an access token for `user_id` with audience `audience`.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    async fn sign_access_token(&self, user_id: &str, audience: &str) -> AuthResult<String>;

    /// Lifetime of the access tokens this signer mints.
    fn access_token_lifetime(&self) -> StdDuration;
}

/// Owns the live signing key.
pub struct SigningKeyManager {
    current: ArcSwap<JwtService>,
    issuer: String,
    tokens: TokenConfig,
}

impl SigningKeyManager {
    /// Wraps an already decoded key pair.
    #[must_use]
    pub fn new(key_pair: SigningKeyPair, issuer: impl Into<String>, tokens: TokenConfig) -> Self {
        let issuer = issuer.into();
        Self {
            current: ArcSwap::from_pointee(JwtService::new(key_pair, issuer.clone())),
            issuer,
            tokens,
        }
    }

    /// Loads the stored signing key, generating and persisting one with
    /// `algorithm` if none exists yet.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the stored key does not decrypt
    /// under `kek`. The key is never silently regenerated in that case.
    pub async fn load_or_generate(
        store: &dyn SigningKeyStorage,
        kek: &KeyEncryptionKey,
        algorithm: SigningAlgorithm,
        config: &OidcConfig,
    ) -> AuthResult<Self> {
        let key_pair = match store.load().await? {
            Some(record) => {
                let key_pair = open_record(&record, kek)?;
                tracing::info!(kid = %key_pair.kid, algorithm = %key_pair.algorithm, "loaded signing key");
                key_pair
            }
            None => {
                let key_pair = tokio::task::spawn_blocking(move || SigningKeyPair::generate(algorithm))
                    .await
                    .map_err(|e| AuthError::internal(format!("key generation task failed: {e}")))??;
                store.save(&seal_record(&key_pair, kek)?).await?;
                tracing::info!(kid = %key_pair.kid, algorithm = %algorithm, "generated new signing key");
                key_pair
            }
        };

        Ok(Self::new(key_pair, config.issuer(), config.tokens.clone()))
    }

    /// Re-reads the stored key and swaps it in, e.g. after an operator rotation.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if no key is stored or it does not
    /// decrypt under `kek`. The previous key stays live on error.
    pub async fn reload(&self, store: &dyn SigningKeyStorage, kek: &KeyEncryptionKey) -> AuthResult<()> {
        let record = store
            .load()
            .await?
            .ok_or_else(|| AuthError::configuration("no signing key stored"))?;
        let key_pair = open_record(&record, kek)?;
        tracing::info!(kid = %key_pair.kid, "reloaded signing key");
        self.current
            .store(Arc::new(JwtService::new(key_pair, self.issuer.clone())));
        Ok(())
    }

    /// Key ID of the live key.
    #[must_use]
    pub fn current_kid(&self) -> String {
        self.current.load().current_kid().to_string()
    }

    /// Public JWK set for the discovery endpoint.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.current.load().jwks()
    }

    /// Verifies an ID token issued by this server.
    ///
    /// Signature and issuer are always checked; expiry only when
    /// `allow_expired` is false. The token must carry an audience.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRequest` for any token that does not verify.
    pub fn verify_id_token(&self, token: &str, allow_expired: bool) -> AuthResult<IdTokenClaims> {
        let service = self.current.load();
        let decoded = if allow_expired {
            service.decode_allow_expired::<IdTokenClaims>(token)
        } else {
            service.decode::<IdTokenClaims>(token)
        };
        let claims = decoded
            .map_err(|e| {
                tracing::debug!(error = %e, "id token verification failed");
                AuthError::invalid_request("invalid id token")
            })?
            .claims;

        if claims.aud.is_empty() {
            return Err(AuthError::invalid_request("invalid id token"));
        }
        Ok(claims)
    }

    fn encode<T: serde::Serialize>(&self, claims: &T) -> AuthResult<String> {
        Ok(self.current.load().encode(claims)?)
    }
}

impl std::fmt::Debug for SigningKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyManager")
            .field("kid", &self.current_kid())
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSigner for SigningKeyManager {
    async fn sign_id_token(
        &self,
        claims: &Map<String, Value>,
        audience: &str,
        nonce: Option<&str>,
    ) -> AuthResult<String> {
        let now = OffsetDateTime::now_utc();
        let id_claims = IdTokenClaims {
            iss: self.issuer.clone(),
            aud: vec![audience.to_string()],
            exp: expiry(now, "tokens.id_token_lifetime", self.tokens.id_token_lifetime)?
                .unix_timestamp(),
            iat: now.unix_timestamp(),
            nonce: nonce.filter(|n| !n.is_empty()).map(str::to_string),
            claims: claims.clone(),
        };
        self.encode(&id_claims)
    }

    async fn sign_access_token(&self, user_id: &str, audience: &str) -> AuthResult<String> {
        let now = OffsetDateTime::now_utc();
        let access_claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: user_id.to_string(),
            aud: vec![audience.to_string()],
            exp: expiry(now, "tokens.access_token_lifetime", self.tokens.access_token_lifetime)?
                .unix_timestamp(),
            iat: now.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        self.encode(&access_claims)
    }

    fn access_token_lifetime(&self) -> StdDuration {
        self.tokens.access_token_lifetime
    }
}

/// Encrypts a key pair's PEM into a storable record.
fn seal_record(key_pair: &SigningKeyPair, kek: &KeyEncryptionKey) -> AuthResult<SigningKeyRecord> {
    let ciphertext =
        SecretBox::new(kek)?.seal(key_pair.private_key_pem().as_bytes(), key_pair.kid.as_bytes())?;
    Ok(SigningKeyRecord {
        kid: key_pair.kid.clone(),
        algorithm: key_pair.algorithm.to_string(),
        ciphertext,
        created_at: OffsetDateTime::now_utc(),
    })
}

/// Decrypts and parses a stored record.
fn open_record(record: &SigningKeyRecord, kek: &KeyEncryptionKey) -> AuthResult<SigningKeyPair> {
    let algorithm = SigningAlgorithm::from_str(&record.algorithm)?;
    let pem = SecretBox::new(kek)?
        .open_string(&record.ciphertext, record.kid.as_bytes())
        .map_err(|_| {
            AuthError::configuration(
                "failed to decrypt the signing key; is the encryption key correct?",
            )
        })?;
    SigningKeyPair::from_pkcs8_pem(record.kid.clone(), algorithm, &pem).map_err(|e: JwtError| {
        AuthError::configuration(format!("stored signing key is unusable: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPurpose;
    use crate::storage::InMemoryStore;

    fn kek(secret: &[u8]) -> KeyEncryptionKey {
        KeyEncryptionKey::derive(secret, "instance-1", KeyPurpose::SigningKey).unwrap()
    }

    fn config() -> OidcConfig {
        OidcConfig {
            app_url: "https://id.example.com".to_string(),
            ..OidcConfig::default()
        }
    }

    #[tokio::test]
    async fn test_generates_once_then_loads() {
        let store = InMemoryStore::new();
        let kek = kek(b"0123456789abcdef");

        let first =
            SigningKeyManager::load_or_generate(&store, &kek, SigningAlgorithm::ES384, &config())
                .await
                .unwrap();
        let record = store.load().await.unwrap().unwrap();
        assert_eq!(record.kid, first.current_kid());
        assert_eq!(record.algorithm, "ES384");
        assert!(!record.ciphertext.contains("PRIVATE KEY"));

        let second =
            SigningKeyManager::load_or_generate(&store, &kek, SigningAlgorithm::ES384, &config())
                .await
                .unwrap();
        assert_eq!(second.current_kid(), first.current_kid());
    }

    #[tokio::test]
    async fn test_wrong_kek_is_configuration_error() {
        let store = InMemoryStore::new();
        SigningKeyManager::load_or_generate(
            &store,
            &kek(b"0123456789abcdef"),
            SigningAlgorithm::ES384,
            &config(),
        )
        .await
        .unwrap();
        let before = store.load().await.unwrap().unwrap();

        let err = SigningKeyManager::load_or_generate(
            &store,
            &kek(b"fedcba9876543210"),
            SigningAlgorithm::ES384,
            &config(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
        assert_eq!(store.load().await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_kid_is_bound_to_ciphertext() {
        let store = InMemoryStore::new();
        let kek = kek(b"0123456789abcdef");
        SigningKeyManager::load_or_generate(&store, &kek, SigningAlgorithm::ES384, &config())
            .await
            .unwrap();

        let mut record = store.load().await.unwrap().unwrap();
        record.kid = "forged".to_string();
        store.save(&record).await.unwrap();

        let err = SigningKeyManager::load_or_generate(&store, &kek, SigningAlgorithm::ES384, &config())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_sign_and_verify_id_token() {
        let manager = SigningKeyManager::new(
            SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap(),
            "https://id.example.com",
            TokenConfig::default(),
        );
        let mut claims = Map::new();
        claims.insert("sub".to_string(), Value::from("u1"));

        let token = manager.sign_id_token(&claims, "c1", Some("")).await.unwrap();
        let verified = manager.verify_id_token(&token, false).unwrap();
        assert_eq!(verified.aud, vec!["c1".to_string()]);
        assert_eq!(verified.subject(), Some("u1"));
        assert!(verified.nonce.is_none());
        assert_eq!(verified.exp - verified.iat, 3600);

        assert!(matches!(
            manager.verify_id_token("not.a.jwt", true),
            Err(AuthError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_access_token_claims() {
        let manager = SigningKeyManager::new(
            SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap(),
            "https://id.example.com",
            TokenConfig::default(),
        );
        let token = manager.sign_access_token("u1", "c1").await.unwrap();
        let decoded = manager
            .current
            .load()
            .decode::<AccessTokenClaims>(&token)
            .unwrap();
        assert_eq!(decoded.claims.sub, "u1");
        assert_eq!(decoded.claims.aud, vec!["c1".to_string()]);
        assert_eq!(manager.access_token_lifetime(), StdDuration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_reload_swaps_key() {
        let store = InMemoryStore::new();
        let kek = kek(b"0123456789abcdef");
        let manager =
            SigningKeyManager::load_or_generate(&store, &kek, SigningAlgorithm::ES384, &config())
                .await
                .unwrap();
        let old_kid = manager.current_kid();

        let replacement = SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap();
        store.save(&seal_record(&replacement, &kek).unwrap()).await.unwrap();

        manager.reload(&store, &kek).await.unwrap();
        assert_ne!(manager.current_kid(), old_kid);
        assert_eq!(manager.jwks().keys[0].kid, replacement.kid);
    }
}
