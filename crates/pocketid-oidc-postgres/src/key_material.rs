//! PostgreSQL storage for the encrypted signing key and generic secrets.
//!
//! The signing key is a single row in `signing_keys` (the table's `slot`
//! column only admits `1`). Secrets live in `encrypted_secrets`.
//!
//! Rotations run in one transaction that first takes a transaction-scoped
//! advisory lock, so concurrent rotations from several instances serialize.
//! Plain writes take the same lock in shared mode and wait for a running
//! rotation to finish.

use async_trait::async_trait;
use pocketid_oidc::AuthResult;
use pocketid_oidc::storage::{
    EncryptedSecretStorage, RotationStore, RotationTransaction, SigningKeyStorage,
};
use pocketid_oidc::types::{EncryptedSecret, SigningKeyRecord};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgTransaction;
use time::OffsetDateTime;

use crate::{PostgresOidcStore, StorageError};

/// Advisory lock key held for the duration of a rotation.
const ROTATION_LOCK_KEY: i64 = 0x706f_636b_6574_6964;

type KeyTuple = (String, String, String, OffsetDateTime);
type SecretTuple = (String, String, OffsetDateTime);

fn key_from_tuple(r: KeyTuple) -> SigningKeyRecord {
    SigningKeyRecord {
        kid: r.0,
        algorithm: r.1,
        ciphertext: r.2,
        created_at: r.3,
    }
}

fn secret_from_tuple(r: SecretTuple) -> EncryptedSecret {
    EncryptedSecret {
        name: r.0,
        ciphertext: r.1,
        updated_at: r.2,
    }
}

const UPSERT_SIGNING_KEY: &str = r#"
    INSERT INTO signing_keys (slot, kid, algorithm, ciphertext, created_at)
    VALUES (1, $1, $2, $3, $4)
    ON CONFLICT (slot)
    DO UPDATE SET
        kid = EXCLUDED.kid,
        algorithm = EXCLUDED.algorithm,
        ciphertext = EXCLUDED.ciphertext,
        created_at = EXCLUDED.created_at
"#;

impl PostgresOidcStore {
    /// Opens a transaction holding the rotation lock in shared mode.
    async fn begin_shared(&self) -> Result<PgTransaction<'static>, StorageError> {
        let mut tx = self.pool().begin().await?;
        query("SELECT pg_advisory_xact_lock_shared($1)")
            .bind(ROTATION_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

#[async_trait]
impl SigningKeyStorage for PostgresOidcStore {
    async fn load(&self) -> AuthResult<Option<SigningKeyRecord>> {
        let row: Option<KeyTuple> = query_as(
            "SELECT kid, algorithm, ciphertext, created_at FROM signing_keys WHERE slot = 1",
        )
        .fetch_optional(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(row.map(key_from_tuple))
    }

    async fn save(&self, record: &SigningKeyRecord) -> AuthResult<()> {
        let mut tx = self.begin_shared().await?;
        query(UPSERT_SIGNING_KEY)
            .bind(&record.kid)
            .bind(&record.algorithm)
            .bind(&record.ciphertext)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;
        tx.commit().await.map_err(StorageError::from)?;

        tracing::info!(kid = %record.kid, "signing key stored");
        Ok(())
    }
}

#[async_trait]
impl EncryptedSecretStorage for PostgresOidcStore {
    async fn get(&self, name: &str) -> AuthResult<Option<EncryptedSecret>> {
        let row: Option<SecretTuple> = query_as(
            "SELECT name, ciphertext, updated_at FROM encrypted_secrets WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(row.map(secret_from_tuple))
    }

    async fn put(&self, secret: &EncryptedSecret) -> AuthResult<()> {
        let mut tx = self.begin_shared().await?;
        query(
            r#"
            INSERT INTO encrypted_secrets (name, ciphertext, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (name)
            DO UPDATE SET
                ciphertext = EXCLUDED.ciphertext,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&secret.name)
        .bind(&secret.ciphertext)
        .bind(secret.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::from)?;
        tx.commit().await.map_err(StorageError::from)?;

        Ok(())
    }

    async fn delete(&self, name: &str) -> AuthResult<bool> {
        let mut tx = self.begin_shared().await?;
        let rows_affected = query("DELETE FROM encrypted_secrets WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?
            .rows_affected();
        tx.commit().await.map_err(StorageError::from)?;

        Ok(rows_affected > 0)
    }
}

#[async_trait]
impl RotationStore for PostgresOidcStore {
    async fn begin(&self) -> AuthResult<Box<dyn RotationTransaction>> {
        let mut tx = self.pool().begin().await.map_err(StorageError::from)?;
        query("SELECT pg_advisory_xact_lock($1)")
            .bind(ROTATION_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;
        tracing::debug!("rotation transaction started");

        Ok(Box::new(PostgresRotation { tx }))
    }
}

// =============================================================================
// Rotation Transaction
// =============================================================================

/// One rotation's database transaction.
///
/// Rows read through it stay locked (`FOR UPDATE`) until commit or rollback.
/// Dropping it without committing rolls back.
pub struct PostgresRotation {
    tx: PgTransaction<'static>,
}

impl std::fmt::Debug for PostgresRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRotation").finish_non_exhaustive()
    }
}

#[async_trait]
impl RotationTransaction for PostgresRotation {
    async fn load_signing_key(&mut self) -> AuthResult<Option<SigningKeyRecord>> {
        let row: Option<KeyTuple> = query_as(
            r#"
            SELECT kid, algorithm, ciphertext, created_at
            FROM signing_keys
            WHERE slot = 1
            FOR UPDATE
            "#,
        )
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StorageError::from)?;

        Ok(row.map(key_from_tuple))
    }

    async fn save_signing_key(&mut self, record: &SigningKeyRecord) -> AuthResult<()> {
        query(UPSERT_SIGNING_KEY)
            .bind(&record.kid)
            .bind(&record.algorithm)
            .bind(&record.ciphertext)
            .bind(record.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(StorageError::from)?;

        Ok(())
    }

    async fn list_secrets(&mut self) -> AuthResult<Vec<EncryptedSecret>> {
        let rows: Vec<SecretTuple> = query_as(
            r#"
            SELECT name, ciphertext, updated_at
            FROM encrypted_secrets
            ORDER BY name
            FOR UPDATE
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(secret_from_tuple).collect())
    }

    async fn update_secret(&mut self, secret: &EncryptedSecret) -> AuthResult<()> {
        query(
            r#"
            UPDATE encrypted_secrets
            SET ciphertext = $2, updated_at = $3
            WHERE name = $1
            "#,
        )
        .bind(&secret.name)
        .bind(&secret.ciphertext)
        .bind(secret.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(StorageError::from)?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> AuthResult<()> {
        self.tx.commit().await.map_err(StorageError::from)?;
        tracing::debug!("rotation transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AuthResult<()> {
        self.tx.rollback().await.map_err(StorageError::from)?;
        tracing::debug!("rotation transaction rolled back");
        Ok(())
    }
}
