//! Device Authorization Grant (RFC 8628).
//!
//! A device without a browser starts the flow with
//! [`DeviceCodeManager::create_device_authorization`] and shows the user a
//! short code. The user approves it elsewhere
//! ([`DeviceCodeManager::verify_device_code`]) while the device polls
//! ([`DeviceCodeManager::poll_device_code`]) until tokens are issued.
//!
//! Poll answers come from [`DeviceCode::evaluate_poll`]; the storage layer
//! makes each transition atomic:
//!
//! - an accepted poll is recorded with a compare-and-set on `last_poll_time`,
//!   so two racing polls cannot both pass the interval check
//! - the successful poll mints first and then removes the row with a
//!   compare-and-delete; only the poll that wins the delete returns tokens

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::audit::{AuditEvent, AuditSink, client_metadata};
use crate::config::{OidcConfig, expiry, whole_seconds};
use crate::error::INVALID_DEVICE_CODE;
use crate::oauth::OidcStores;
use crate::oauth::authorize::{ensure_group_access, resolve_consent};
use crate::oauth::token::{TokenMinter, TokenResponse};
use crate::random::{CODE_LENGTH, alphanumeric, user_code};
use crate::storage::with_deadline;
use crate::types::{DeviceCode, DeviceCodeState, GrantType, PollDecision};
use crate::{AuthError, AuthResult};

/// Response of the device authorization endpoint (RFC 8628 §3.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAuthorizationResponse {
    /// Code the device polls with.
    pub device_code: String,
    /// Code the user enters.
    pub user_code: String,
    /// Page where the user enters the code.
    pub verification_uri: String,
    /// Verification page with the code pre-filled.
    pub verification_uri_complete: String,
    /// Seconds until both codes expire.
    pub expires_in: u64,
    /// Minimum seconds between polls.
    pub interval: u64,
}

/// Runs the device grant state machine.
pub struct DeviceCodeManager {
    stores: OidcStores,
    minter: Arc<TokenMinter>,
    audit: Arc<dyn AuditSink>,
    verification_uri: String,
    lifetime: Duration,
    interval: Duration,
    timeout: Duration,
}

impl DeviceCodeManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(
        stores: OidcStores,
        minter: Arc<TokenMinter>,
        audit: Arc<dyn AuditSink>,
        config: &OidcConfig,
    ) -> Self {
        Self {
            stores,
            minter,
            audit,
            verification_uri: format!("{}/device", config.base_url()),
            lifetime: config.device_code_lifetime,
            interval: config.device_poll_interval,
            timeout: config.storage.operation_timeout,
        }
    }

    /// Starts a device authorization for `client_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClient` for an unknown client and
    /// `UnsupportedGrantType` if the client has the device grant disabled.
    pub async fn create_device_authorization(
        &self,
        client_id: &str,
        scope: &str,
    ) -> AuthResult<DeviceAuthorizationResponse> {
        let client = with_deadline(self.timeout, self.stores.clients.find_by_id(client_id))
            .await?
            .ok_or_else(|| AuthError::invalid_client("unknown client"))?;
        if !client.device_code_enabled {
            return Err(AuthError::unsupported_grant_type(GrantType::DEVICE_CODE_URN));
        }

        let now = OffsetDateTime::now_utc();
        let row = DeviceCode {
            device_code: alphanumeric(CODE_LENGTH),
            user_code: user_code(),
            client_id: client.id.clone(),
            scope: scope.to_string(),
            interval: whole_seconds("device_poll_interval", self.interval)?,
            is_authorized: false,
            user_id: None,
            last_poll_time: None,
            created_at: now,
            expires_at: expiry(now, "device_code_lifetime", self.lifetime)?,
        };
        with_deadline(self.timeout, self.stores.device_codes.create(&row)).await?;

        tracing::info!(client_id = %client.id, "started device authorization");

        Ok(DeviceAuthorizationResponse {
            verification_uri_complete: format!("{}?code={}", self.verification_uri, row.user_code),
            verification_uri: self.verification_uri.clone(),
            device_code: row.device_code,
            user_code: row.user_code,
            expires_in: self.lifetime.as_secs(),
            interval: self.interval.as_secs(),
        })
    }

    /// Approves the device authorization behind `user_code` for `user_id`.
    ///
    /// The code is matched case-insensitively, ignoring surrounding
    /// whitespace. Consent is recorded exactly as for the interactive flow.
    ///
    /// # Errors
    ///
    /// - `InvalidGrant` for an unknown user code
    /// - `ExpiredToken` once the code expired
    /// - `AccessDenied` when the client is restricted to groups the user is
    ///   not in
    pub async fn verify_device_code(&self, user_code: &str, user_id: &str) -> AuthResult<()> {
        let user_code = user_code.trim().to_ascii_uppercase();
        let now = OffsetDateTime::now_utc();

        let row = with_deadline(self.timeout, self.stores.device_codes.find_by_user_code(&user_code))
            .await?
            .ok_or_else(|| AuthError::invalid_grant(INVALID_DEVICE_CODE))?;
        if row.state(now) == DeviceCodeState::Expired {
            return Err(AuthError::expired_token("device code has expired"));
        }

        let client = with_deadline(self.timeout, self.stores.clients.find_by_id(&row.client_id))
            .await?
            .ok_or_else(|| AuthError::invalid_grant(INVALID_DEVICE_CODE))?;
        let user = with_deadline(self.timeout, self.stores.users.load_user(user_id))
            .await?
            .ok_or_else(|| AuthError::access_denied("unknown user"))?;
        ensure_group_access(&client, &user)?;

        // Consent must exist before a poll can redeem the code
        let new_consent = resolve_consent(
            self.stores.consents.as_ref(),
            user_id,
            &client.id,
            &row.scope,
            now,
            self.timeout,
        )
        .await?;

        let authorized = with_deadline(
            self.timeout,
            self.stores.device_codes.authorize(&user_code, user_id, now),
        )
        .await?;
        if !authorized {
            // Expired or swept between the lookup and the update
            return Err(AuthError::expired_token("device code has expired"));
        }

        tracing::info!(client_id = %client.id, user_id = %user_id, new_consent, "device code verified");

        self.audit
            .record(
                AuditEvent::device_code_authorization(new_consent),
                user_id,
                client_metadata(&client.name),
            )
            .await;

        Ok(())
    }

    /// Answers a device poll.
    ///
    /// The caller has authenticated `client_id`.
    ///
    /// # Errors
    ///
    /// - `InvalidGrant` for unknown, foreign or already redeemed codes
    /// - `ExpiredToken` once the code expired
    /// - `AuthorizationPending` until the user approves
    /// - `SlowDown` when polled faster than the interval
    pub async fn poll_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> AuthResult<TokenResponse> {
        let now = OffsetDateTime::now_utc();
        let row = with_deadline(
            self.timeout,
            self.stores.device_codes.find_by_device_code(device_code, client_id),
        )
        .await?
        .ok_or_else(|| AuthError::invalid_grant(INVALID_DEVICE_CODE))?;

        match row.evaluate_poll(now) {
            PollDecision::Expired => Err(AuthError::expired_token("device code has expired")),
            PollDecision::SlowDown => Err(AuthError::SlowDown),
            PollDecision::Pending => {
                let recorded = with_deadline(
                    self.timeout,
                    self.stores
                        .device_codes
                        .record_poll(device_code, row.last_poll_time, now),
                )
                .await?;
                // Another poll got there first
                if recorded {
                    Err(AuthError::AuthorizationPending)
                } else {
                    Err(AuthError::SlowDown)
                }
            }
            PollDecision::Ready { user_id } => {
                // Mint before consuming: a failed mint leaves the grant for the next poll
                let tokens = self.minter.mint(&user_id, client_id, None).await?;

                let taken = with_deadline(
                    self.timeout,
                    self.stores.device_codes.take_authorized(device_code, client_id, now),
                )
                .await?;
                if taken.and_then(|row| row.user_id).as_deref() != Some(user_id.as_str()) {
                    return Err(AuthError::invalid_grant(INVALID_DEVICE_CODE));
                }

                tracing::info!(client_id = %client_id, user_id = %user_id, "device code redeemed");
                Ok(tokens)
            }
        }
    }
}

impl std::fmt::Debug for DeviceCodeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCodeManager")
            .field("verification_uri", &self.verification_uri)
            .field("lifetime", &self.lifetime)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use crate::claims::{ClaimsAssembler, ClaimsPolicy};
    use crate::oauth::test_support::{Harness, public_client};
    use crate::storage::{ConsentStorage, DeviceCodeStorage};
    use crate::types::{ConsentUpsert, UserAuthorizedClient};

    /// Fails the first consent lookup, then delegates.
    struct FailFirstLookup {
        inner: Arc<dyn ConsentStorage>,
        failed: AtomicBool,
    }

    #[async_trait]
    impl ConsentStorage for FailFirstLookup {
        async fn find(
            &self,
            user_id: &str,
            client_id: &str,
        ) -> AuthResult<Option<UserAuthorizedClient>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(AuthError::storage("transient timeout"));
            }
            self.inner.find(user_id, client_id).await
        }

        async fn upsert(
            &self,
            user_id: &str,
            client_id: &str,
            scope: &str,
            now: OffsetDateTime,
        ) -> AuthResult<ConsentUpsert> {
            self.inner.upsert(user_id, client_id, scope, now).await
        }

        async fn touch(&self, user_id: &str, client_id: &str, now: OffsetDateTime) -> AuthResult<()> {
            self.inner.touch(user_id, client_id, now).await
        }

        async fn revoke(&self, user_id: &str, client_id: &str) -> AuthResult<bool> {
            self.inner.revoke(user_id, client_id).await
        }

        async fn list_for_user(&self, user_id: &str) -> AuthResult<Vec<UserAuthorizedClient>> {
            self.inner.list_for_user(user_id).await
        }
    }

    async fn started(h: &Harness) -> DeviceAuthorizationResponse {
        h.add_client(public_client("tv")).await;
        h.devices()
            .create_device_authorization("tv", "openid profile")
            .await
            .unwrap()
    }

    /// Moves the stored poll timestamp back so the next poll clears the interval.
    async fn age_last_poll(h: &Harness, device_code: &str) {
        let row = h
            .store
            .find_by_device_code(device_code, "tv")
            .await
            .unwrap()
            .unwrap();
        let last = row.last_poll_time.unwrap();
        let aged = last - time::Duration::seconds(row.interval);
        assert!(h.store.record_poll(device_code, Some(last), aged).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_device_authorization() {
        let h = Harness::new().await;
        let response = started(&h).await;

        assert_eq!(response.device_code.len(), CODE_LENGTH);
        assert_eq!(response.user_code.len(), crate::random::USER_CODE_LENGTH);
        assert_eq!(response.verification_uri, "https://id.example.com/device");
        assert_eq!(
            response.verification_uri_complete,
            format!("https://id.example.com/device?code={}", response.user_code)
        );
        assert_eq!(response.expires_in, 900);
        assert_eq!(response.interval, 5);
        assert_eq!(h.store.device_code_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_requires_enabled_client() {
        let h = Harness::new().await;
        let mut client = public_client("tv");
        client.device_code_enabled = false;
        h.add_client(client).await;

        let err = h
            .devices()
            .create_device_authorization("tv", "openid")
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "unsupported_grant_type");

        let err = h
            .devices()
            .create_device_authorization("ghost", "openid")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidClient { .. }));
    }

    #[tokio::test]
    async fn test_create_rejects_unrepresentable_lifetime() {
        let h = Harness::new().await;
        h.add_client(public_client("tv")).await;
        let config = OidcConfig {
            device_code_lifetime: Duration::MAX,
            ..h.config.clone()
        };
        let devices = DeviceCodeManager::new(h.stores.clone(), h.minter(), h.audit.clone(), &config);

        let err = devices.create_device_authorization("tv", "openid").await.unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
        assert_eq!(h.store.device_code_count().await, 0);
    }

    #[tokio::test]
    async fn test_full_device_flow() {
        let h = Harness::new().await;
        let response = started(&h).await;
        let devices = h.devices();

        let err = devices.poll_device_code(&response.device_code, "tv").await.unwrap_err();
        assert!(matches!(err, AuthError::AuthorizationPending));

        devices
            .verify_device_code(&response.user_code.to_lowercase(), "u1")
            .await
            .unwrap();
        assert_eq!(h.audit.events(), vec![AuditEvent::NewDeviceCodeAuthorization]);

        // Authorized, but the pending poll above was moments ago
        let err = devices.poll_device_code(&response.device_code, "tv").await.unwrap_err();
        assert!(matches!(err, AuthError::SlowDown));

        age_last_poll(&h, &response.device_code).await;
        let tokens = devices.poll_device_code(&response.device_code, "tv").await.unwrap();
        let claims = h.signer.verify_id_token(&tokens.id_token, false).unwrap();
        assert_eq!(claims.subject(), Some("u1"));
        assert!(claims.nonce.is_none());
        assert_eq!(claims.claims["preferred_username"], "alice");

        let err = devices.poll_device_code(&response.device_code, "tv").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
        assert_eq!(h.store.device_code_count().await, 0);
    }

    #[tokio::test]
    async fn test_first_poll_after_authorization_succeeds() {
        let h = Harness::new().await;
        let response = started(&h).await;
        let devices = h.devices();

        devices.verify_device_code(&response.user_code, "u1").await.unwrap();
        assert!(devices.poll_device_code(&response.device_code, "tv").await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_mint_keeps_authorized_code() {
        let h = Harness::new().await;
        let response = started(&h).await;
        h.devices().verify_device_code(&response.user_code, "u1").await.unwrap();

        let stores = OidcStores {
            consents: Arc::new(FailFirstLookup {
                inner: h.stores.consents.clone(),
                failed: AtomicBool::new(false),
            }),
            ..h.stores.clone()
        };
        let minter = Arc::new(TokenMinter::new(
            stores.clone(),
            h.signer.clone(),
            ClaimsAssembler::new(ClaimsPolicy::from_config(&h.config)),
            h.timeout(),
        ));
        let devices = DeviceCodeManager::new(stores, minter, h.audit.clone(), &h.config);

        let err = devices.poll_device_code(&response.device_code, "tv").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.store.device_code_count().await, 1);

        let tokens = devices.poll_device_code(&response.device_code, "tv").await.unwrap();
        let claims = h.signer.verify_id_token(&tokens.id_token, false).unwrap();
        assert_eq!(claims.subject(), Some("u1"));
        assert_eq!(h.store.device_code_count().await, 0);
    }

    #[tokio::test]
    async fn test_pending_polls_are_recorded() {
        let h = Harness::new().await;
        let response = started(&h).await;
        let devices = h.devices();

        for _ in 0..3 {
            let err = devices.poll_device_code(&response.device_code, "tv").await.unwrap_err();
            assert!(matches!(err, AuthError::AuthorizationPending));
        }
        let row = h
            .store
            .find_by_device_code(&response.device_code, "tv")
            .await
            .unwrap()
            .unwrap();
        assert!(row.last_poll_time.is_some());
    }

    #[tokio::test]
    async fn test_slow_down_leaves_poll_time_unchanged() {
        let h = Harness::new().await;
        let response = started(&h).await;
        let devices = h.devices();

        let _ = devices.poll_device_code(&response.device_code, "tv").await;
        devices.verify_device_code(&response.user_code, "u1").await.unwrap();
        let before = h
            .store
            .find_by_device_code(&response.device_code, "tv")
            .await
            .unwrap()
            .unwrap()
            .last_poll_time;

        let err = devices.poll_device_code(&response.device_code, "tv").await.unwrap_err();
        assert!(matches!(err, AuthError::SlowDown));

        let after = h
            .store
            .find_by_device_code(&response.device_code, "tv")
            .await
            .unwrap()
            .unwrap()
            .last_poll_time;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_unknown_and_foreign_device_codes() {
        let h = Harness::new().await;
        let response = started(&h).await;
        h.add_client(public_client("other")).await;
        let devices = h.devices();

        let err = devices.poll_device_code("missing", "tv").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));

        let err = devices.poll_device_code(&response.device_code, "other").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));

        let err = devices.verify_device_code("ZZZZZZZZ", "u1").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_expired_device_code() {
        let h = Harness::new().await;
        h.add_client(public_client("tv")).await;
        let now = OffsetDateTime::now_utc();
        DeviceCodeStorage::create(
            &h.store,
            &DeviceCode {
                device_code: "old-device-code".to_string(),
                user_code: "ACDEFGHJ".to_string(),
                client_id: "tv".to_string(),
                scope: "openid".to_string(),
                interval: 5,
                is_authorized: false,
                user_id: None,
                last_poll_time: None,
                created_at: now - time::Duration::minutes(30),
                expires_at: now - time::Duration::minutes(15),
            },
        )
        .await
        .unwrap();
        let devices = h.devices();

        let err = devices.poll_device_code("old-device-code", "tv").await.unwrap_err();
        assert!(matches!(err, AuthError::ExpiredToken { .. }));

        let err = devices.verify_device_code("ACDEFGHJ", "u1").await.unwrap_err();
        assert!(matches!(err, AuthError::ExpiredToken { .. }));
    }

    #[tokio::test]
    async fn test_verify_enforces_group_restriction() {
        let h = Harness::new().await;
        let mut client = public_client("tv");
        client.allowed_user_groups = vec!["g-admins".to_string()];
        h.add_client(client).await;
        let devices = h.devices();
        let response = devices.create_device_authorization("tv", "openid").await.unwrap();

        let err = devices.verify_device_code(&response.user_code, "u1").await.unwrap_err();
        assert!(matches!(err, AuthError::AccessDenied { .. }));

        let err = devices.poll_device_code(&response.device_code, "tv").await.unwrap_err();
        assert!(matches!(err, AuthError::AuthorizationPending));
        assert!(h.audit.events().is_empty());
    }

    #[tokio::test]
    async fn test_repeat_device_consent() {
        let h = Harness::new().await;
        h.add_client(public_client("tv")).await;
        let devices = h.devices();

        for _ in 0..2 {
            let response = devices.create_device_authorization("tv", "openid").await.unwrap();
            devices.verify_device_code(&response.user_code, "u1").await.unwrap();
        }
        assert_eq!(
            h.audit.events(),
            vec![
                AuditEvent::NewDeviceCodeAuthorization,
                AuditEvent::DeviceCodeAuthorization,
            ]
        );
    }
}
