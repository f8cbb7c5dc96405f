//! PostgreSQL storage for Device Authorization Grant rows.

use async_trait::async_trait;
use pocketid_oidc::AuthResult;
use pocketid_oidc::storage::DeviceCodeStorage;
use pocketid_oidc::types::DeviceCode;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::{PostgresOidcStore, StorageError};

const COLUMNS: &str = "device_code, user_code, client_id, scope, interval, is_authorized, \
                       user_id, last_poll_time, created_at, expires_at";

type DeviceTuple = (
    String,
    String,
    String,
    String,
    i64,
    bool,
    Option<String>,
    Option<OffsetDateTime>,
    OffsetDateTime,
    OffsetDateTime,
);

fn device_from_tuple(r: DeviceTuple) -> DeviceCode {
    DeviceCode {
        device_code: r.0,
        user_code: r.1,
        client_id: r.2,
        scope: r.3,
        interval: r.4,
        is_authorized: r.5,
        user_id: r.6,
        last_poll_time: r.7,
        created_at: r.8,
        expires_at: r.9,
    }
}

#[async_trait]
impl DeviceCodeStorage for PostgresOidcStore {
    async fn create(&self, device_code: &DeviceCode) -> AuthResult<()> {
        query(
            r#"
            INSERT INTO oidc_device_codes
                (device_code, user_code, client_id, scope, interval, is_authorized,
                 user_id, last_poll_time, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&device_code.device_code)
        .bind(&device_code.user_code)
        .bind(&device_code.client_id)
        .bind(&device_code.scope)
        .bind(device_code.interval)
        .bind(device_code.is_authorized)
        .bind(&device_code.user_id)
        .bind(device_code.last_poll_time)
        .bind(device_code.created_at)
        .bind(device_code.expires_at)
        .execute(self.pool())
        .await
        .map_err(|e| StorageError::from_insert(e, "device code"))?;

        Ok(())
    }

    async fn find_by_user_code(&self, user_code: &str) -> AuthResult<Option<DeviceCode>> {
        let sql = format!("SELECT {COLUMNS} FROM oidc_device_codes WHERE user_code = $1");
        let row: Option<DeviceTuple> = query_as(&sql)
            .bind(user_code)
            .fetch_optional(self.pool())
            .await
            .map_err(StorageError::from)?;

        Ok(row.map(device_from_tuple))
    }

    async fn find_by_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> AuthResult<Option<DeviceCode>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM oidc_device_codes WHERE device_code = $1 AND client_id = $2"
        );
        let row: Option<DeviceTuple> = query_as(&sql)
            .bind(device_code)
            .bind(client_id)
            .fetch_optional(self.pool())
            .await
            .map_err(StorageError::from)?;

        Ok(row.map(device_from_tuple))
    }

    async fn authorize(
        &self,
        user_code: &str,
        user_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<bool> {
        let rows_affected = query(
            r#"
            UPDATE oidc_device_codes
            SET is_authorized = TRUE, user_id = $2
            WHERE user_code = $1 AND expires_at > $3
            "#,
        )
        .bind(user_code)
        .bind(user_id)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(StorageError::from)?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    async fn record_poll(
        &self,
        device_code: &str,
        expected: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> AuthResult<bool> {
        let rows_affected = query(
            r#"
            UPDATE oidc_device_codes
            SET last_poll_time = $3
            WHERE device_code = $1 AND last_poll_time IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(device_code)
        .bind(expected)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(StorageError::from)?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn take_authorized(
        &self,
        device_code: &str,
        client_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<DeviceCode>> {
        let sql = format!(
            r#"
            DELETE FROM oidc_device_codes
            WHERE device_code = $1
              AND client_id = $2
              AND is_authorized
              AND user_id IS NOT NULL
              AND expires_at > $3
            RETURNING {COLUMNS}
            "#
        );
        let row: Option<DeviceTuple> = query_as(&sql)
            .bind(device_code)
            .bind(client_id)
            .bind(now)
            .fetch_optional(self.pool())
            .await
            .map_err(StorageError::from)?;

        Ok(row.map(device_from_tuple))
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let result = query("DELETE FROM oidc_device_codes WHERE expires_at <= $1")
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(StorageError::from)?;

        Ok(result.rows_affected())
    }
}
