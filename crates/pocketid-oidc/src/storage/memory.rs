//! In-process storage backend.
//!
//! Implements every storage trait over `tokio::sync::RwLock`-guarded maps.
//! Used by the test suites and by embedders that do not need durability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{
    AuthorizationCodeStorage, ClientStorage, ConsentStorage, DeviceCodeStorage,
    EncryptedSecretStorage, RotationStore, RotationTransaction, SigningKeyStorage, UserDirectory,
};
use crate::types::{
    AuthorizationCode, Client, ConsentUpsert, DeviceCode, EncryptedSecret, SigningKeyRecord, User,
    UserAuthorizedClient,
};
use crate::{AuthError, AuthResult};

#[derive(Default)]
struct Inner {
    clients: RwLock<HashMap<String, Client>>,
    codes: RwLock<HashMap<String, AuthorizationCode>>,
    device_codes: RwLock<HashMap<String, DeviceCode>>,
    consents: RwLock<HashMap<(String, String), UserAuthorizedClient>>,
    users: RwLock<HashMap<String, User>>,
    signing_key: RwLock<Option<SigningKeyRecord>>,
    secrets: RwLock<HashMap<String, EncryptedSecret>>,
    rotation: Arc<Mutex<()>>,
}

/// Cheaply cloneable in-memory store; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user in the directory.
    pub async fn insert_user(&self, user: User) {
        self.inner.users.write().await.insert(user.id.clone(), user);
    }

    /// Number of stored authorization codes, expired ones included.
    pub async fn authorization_code_count(&self) -> usize {
        self.inner.codes.read().await.len()
    }

    /// Number of stored device codes, expired ones included.
    pub async fn device_code_count(&self) -> usize {
        self.inner.device_codes.read().await.len()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish_non_exhaustive()
    }
}

// =============================================================================
// Clients
// =============================================================================

#[async_trait]
impl ClientStorage for InMemoryStore {
    async fn find_by_id(&self, client_id: &str) -> AuthResult<Option<Client>> {
        Ok(self.inner.clients.read().await.get(client_id).cloned())
    }

    async fn create(&self, client: &Client) -> AuthResult<()> {
        client
            .validate()
            .map_err(|e| AuthError::invalid_request(e.to_string()))?;
        let mut clients = self.inner.clients.write().await;
        if clients.contains_key(&client.id) {
            return Err(AuthError::invalid_request(format!(
                "client '{}' already exists",
                client.id
            )));
        }
        clients.insert(client.id.clone(), client.clone());
        Ok(())
    }

    async fn update(&self, client: &Client) -> AuthResult<()> {
        client
            .validate()
            .map_err(|e| AuthError::invalid_request(e.to_string()))?;
        let mut clients = self.inner.clients.write().await;
        match clients.get_mut(&client.id) {
            Some(existing) => {
                *existing = client.clone();
                Ok(())
            }
            None => Err(AuthError::invalid_client("client not found")),
        }
    }

    async fn delete(&self, client_id: &str) -> AuthResult<bool> {
        Ok(self.inner.clients.write().await.remove(client_id).is_some())
    }
}

// =============================================================================
// Authorization codes
// =============================================================================

#[async_trait]
impl AuthorizationCodeStorage for InMemoryStore {
    async fn create(&self, code: &AuthorizationCode) -> AuthResult<()> {
        let mut codes = self.inner.codes.write().await;
        if codes.contains_key(&code.code) {
            return Err(AuthError::storage("authorization code collision"));
        }
        codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn take(&self, code: &str) -> AuthResult<Option<AuthorizationCode>> {
        Ok(self.inner.codes.write().await.remove(code))
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let mut codes = self.inner.codes.write().await;
        let before = codes.len();
        codes.retain(|_, code| !code.is_expired(now));
        Ok((before - codes.len()) as u64)
    }
}

// =============================================================================
// Device codes
// =============================================================================

#[async_trait]
impl DeviceCodeStorage for InMemoryStore {
    async fn create(&self, device_code: &DeviceCode) -> AuthResult<()> {
        let mut rows = self.inner.device_codes.write().await;
        if rows.contains_key(&device_code.device_code)
            || rows.values().any(|row| row.user_code == device_code.user_code)
        {
            return Err(AuthError::storage("device code collision"));
        }
        rows.insert(device_code.device_code.clone(), device_code.clone());
        Ok(())
    }

    async fn find_by_user_code(&self, user_code: &str) -> AuthResult<Option<DeviceCode>> {
        Ok(self
            .inner
            .device_codes
            .read()
            .await
            .values()
            .find(|row| row.user_code == user_code)
            .cloned())
    }

    async fn find_by_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> AuthResult<Option<DeviceCode>> {
        Ok(self
            .inner
            .device_codes
            .read()
            .await
            .get(device_code)
            .filter(|row| row.client_id == client_id)
            .cloned())
    }

    async fn authorize(
        &self,
        user_code: &str,
        user_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<bool> {
        let mut rows = self.inner.device_codes.write().await;
        let Some(row) = rows
            .values_mut()
            .find(|row| row.user_code == user_code && now < row.expires_at)
        else {
            return Ok(false);
        };
        row.is_authorized = true;
        row.user_id = Some(user_id.to_string());
        Ok(true)
    }

    async fn record_poll(
        &self,
        device_code: &str,
        expected: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> AuthResult<bool> {
        let mut rows = self.inner.device_codes.write().await;
        match rows.get_mut(device_code) {
            Some(row) if row.last_poll_time == expected => {
                row.last_poll_time = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn take_authorized(
        &self,
        device_code: &str,
        client_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<DeviceCode>> {
        let mut rows = self.inner.device_codes.write().await;
        let ready = rows.get(device_code).is_some_and(|row| {
            row.client_id == client_id
                && row.is_authorized
                && row.user_id.is_some()
                && now < row.expires_at
        });
        Ok(if ready { rows.remove(device_code) } else { None })
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let mut rows = self.inner.device_codes.write().await;
        let before = rows.len();
        rows.retain(|_, row| now < row.expires_at);
        Ok((before - rows.len()) as u64)
    }
}

// =============================================================================
// Consent
// =============================================================================

#[async_trait]
impl ConsentStorage for InMemoryStore {
    async fn find(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> AuthResult<Option<UserAuthorizedClient>> {
        let key = (user_id.to_string(), client_id.to_string());
        Ok(self.inner.consents.read().await.get(&key).cloned())
    }

    async fn upsert(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &str,
        now: OffsetDateTime,
    ) -> AuthResult<ConsentUpsert> {
        let key = (user_id.to_string(), client_id.to_string());
        let previous = self.inner.consents.write().await.insert(
            key,
            UserAuthorizedClient {
                user_id: user_id.to_string(),
                client_id: client_id.to_string(),
                scope: scope.to_string(),
                last_used_at: now,
            },
        );
        Ok(if previous.is_some() {
            ConsentUpsert::Updated
        } else {
            ConsentUpsert::Created
        })
    }

    async fn touch(&self, user_id: &str, client_id: &str, now: OffsetDateTime) -> AuthResult<()> {
        let key = (user_id.to_string(), client_id.to_string());
        if let Some(consent) = self.inner.consents.write().await.get_mut(&key) {
            consent.last_used_at = now;
        }
        Ok(())
    }

    async fn revoke(&self, user_id: &str, client_id: &str) -> AuthResult<bool> {
        let key = (user_id.to_string(), client_id.to_string());
        Ok(self.inner.consents.write().await.remove(&key).is_some())
    }

    async fn list_for_user(&self, user_id: &str) -> AuthResult<Vec<UserAuthorizedClient>> {
        let mut consents: Vec<_> = self
            .inner
            .consents
            .read()
            .await
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        consents.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        Ok(consents)
    }
}

// =============================================================================
// Users
// =============================================================================

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn load_user(&self, user_id: &str) -> AuthResult<Option<User>> {
        Ok(self.inner.users.read().await.get(user_id).cloned())
    }
}

// =============================================================================
// Key material
// =============================================================================

#[async_trait]
impl SigningKeyStorage for InMemoryStore {
    async fn load(&self) -> AuthResult<Option<SigningKeyRecord>> {
        Ok(self.inner.signing_key.read().await.clone())
    }

    async fn save(&self, record: &SigningKeyRecord) -> AuthResult<()> {
        let _rotation = self.inner.rotation.lock().await;
        *self.inner.signing_key.write().await = Some(record.clone());
        Ok(())
    }
}

#[async_trait]
impl EncryptedSecretStorage for InMemoryStore {
    async fn get(&self, name: &str) -> AuthResult<Option<EncryptedSecret>> {
        Ok(self.inner.secrets.read().await.get(name).cloned())
    }

    // Writes wait for an open rotation so they land under the new key
    async fn put(&self, secret: &EncryptedSecret) -> AuthResult<()> {
        let _rotation = self.inner.rotation.lock().await;
        self.inner
            .secrets
            .write()
            .await
            .insert(secret.name.clone(), secret.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> AuthResult<bool> {
        let _rotation = self.inner.rotation.lock().await;
        Ok(self.inner.secrets.write().await.remove(name).is_some())
    }
}

#[async_trait]
impl RotationStore for InMemoryStore {
    async fn begin(&self) -> AuthResult<Box<dyn RotationTransaction>> {
        let guard = Arc::clone(&self.inner.rotation).lock_owned().await;
        Ok(Box::new(MemoryRotation {
            inner: Arc::clone(&self.inner),
            _guard: guard,
            signing_key: None,
            secrets: Vec::new(),
        }))
    }
}

/// Staged rotation writes, applied together on commit.
struct MemoryRotation {
    inner: Arc<Inner>,
    _guard: OwnedMutexGuard<()>,
    signing_key: Option<SigningKeyRecord>,
    secrets: Vec<EncryptedSecret>,
}

#[async_trait]
impl RotationTransaction for MemoryRotation {
    async fn load_signing_key(&mut self) -> AuthResult<Option<SigningKeyRecord>> {
        Ok(self.inner.signing_key.read().await.clone())
    }

    async fn save_signing_key(&mut self, record: &SigningKeyRecord) -> AuthResult<()> {
        self.signing_key = Some(record.clone());
        Ok(())
    }

    async fn list_secrets(&mut self) -> AuthResult<Vec<EncryptedSecret>> {
        let mut secrets: Vec<_> = self.inner.secrets.read().await.values().cloned().collect();
        secrets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(secrets)
    }

    async fn update_secret(&mut self, secret: &EncryptedSecret) -> AuthResult<()> {
        self.secrets.push(secret.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AuthResult<()> {
        let Self {
            inner,
            _guard,
            signing_key,
            secrets,
        } = *self;
        let mut key_slot = inner.signing_key.write().await;
        let mut secret_map = inner.secrets.write().await;
        if let Some(record) = signing_key {
            *key_slot = Some(record);
        }
        // Update only; a staged secret never recreates a removed row
        for secret in secrets {
            if let Some(slot) = secret_map.get_mut(&secret.name) {
                *slot = secret;
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AuthResult<()> {
        Ok(())
    }
}
