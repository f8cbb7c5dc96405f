//! Fixtures shared by the grant service tests.

use std::sync::Arc;
use std::time::Duration;

use crate::audit::RecordingAuditSink;
use crate::claims::{ClaimsAssembler, ClaimsPolicy};
use crate::config::OidcConfig;
use crate::oauth::authorize::AuthorizationService;
use crate::oauth::client_auth::ClientAuthenticator;
use crate::oauth::device::DeviceCodeManager;
use crate::oauth::token::{TokenIssuer, TokenMinter};
use crate::oauth::OidcStores;
use crate::secret::SecretComparator;
use crate::storage::{ClientStorage, InMemoryStore};
use crate::token::{SigningAlgorithm, SigningKeyManager, SigningKeyPair};
use crate::types::{Client, CustomClaim, User, UserGroup};

/// Accepts `"<secret>"` against the hash `"hash:<secret>"`.
pub(crate) struct PlainComparator;

impl SecretComparator for PlainComparator {
    fn compare(&self, hash: &str, candidate: &str) -> bool {
        hash.strip_prefix("hash:") == Some(candidate)
    }
}

pub(crate) fn config() -> OidcConfig {
    OidcConfig {
        app_url: "https://id.example.com/".to_string(),
        instance_id: "test-instance".to_string(),
        ..OidcConfig::default()
    }
}

pub(crate) fn public_client(id: &str) -> Client {
    Client {
        id: id.to_string(),
        name: format!("{id} app"),
        secret_hash: String::new(),
        callback_urls: vec!["https://app.example.com/callback".to_string()],
        logout_callback_urls: vec!["https://app.example.com/logout".to_string()],
        is_public: true,
        pkce_enabled: false,
        device_code_enabled: true,
        allowed_user_groups: vec![],
        created_by: None,
    }
}

/// A confidential client whose secret is `"s3cret"`.
pub(crate) fn confidential_client(id: &str) -> Client {
    Client {
        secret_hash: "hash:s3cret".to_string(),
        is_public: false,
        ..public_client(id)
    }
}

pub(crate) fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        username: "alice".to_string(),
        email: Some("alice@example.com".to_string()),
        first_name: "Alice".to_string(),
        last_name: "Liddell".to_string(),
        custom_claims: vec![CustomClaim::new("department", "research")],
        groups: vec![UserGroup {
            id: "g-staff".to_string(),
            name: "staff".to_string(),
            custom_claims: vec![],
        }],
    }
}

/// In-memory store, real ES384 signer and a recording audit sink.
pub(crate) struct Harness {
    pub store: InMemoryStore,
    pub stores: OidcStores,
    pub audit: Arc<RecordingAuditSink>,
    pub signer: Arc<SigningKeyManager>,
    pub config: OidcConfig,
}

impl Harness {
    pub async fn new() -> Self {
        let config = config();
        let store = InMemoryStore::new();
        store.insert_user(user("u1")).await;

        let pair = SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap();
        let signer = Arc::new(SigningKeyManager::new(
            pair,
            config.issuer(),
            config.tokens.clone(),
        ));

        Self {
            stores: OidcStores::from_backend(Arc::new(store.clone())),
            store,
            audit: Arc::new(RecordingAuditSink::new()),
            signer,
            config,
        }
    }

    pub async fn add_client(&self, client: Client) {
        ClientStorage::create(&self.store, &client).await.unwrap();
    }

    pub fn timeout(&self) -> Duration {
        self.config.storage.operation_timeout
    }

    pub fn authorization(&self) -> AuthorizationService {
        AuthorizationService::new(self.stores.clone(), self.audit.clone(), &self.config)
    }

    pub fn minter(&self) -> Arc<TokenMinter> {
        Arc::new(TokenMinter::new(
            self.stores.clone(),
            self.signer.clone(),
            ClaimsAssembler::new(ClaimsPolicy::from_config(&self.config)),
            self.timeout(),
        ))
    }

    pub fn devices(&self) -> Arc<DeviceCodeManager> {
        Arc::new(DeviceCodeManager::new(
            self.stores.clone(),
            self.minter(),
            self.audit.clone(),
            &self.config,
        ))
    }

    pub fn issuer(&self) -> TokenIssuer {
        let authenticator = ClientAuthenticator::new(
            self.stores.clients.clone(),
            Arc::new(PlainComparator),
            self.timeout(),
        );
        TokenIssuer::new(
            self.stores.clone(),
            authenticator,
            self.minter(),
            self.devices(),
            self.timeout(),
        )
    }
}
