//! PostgreSQL storage for OIDC client registrations.
//!
//! Clients live in the `oidc_clients` table. Callback URLs, logout callback
//! URLs and allowed groups are `TEXT[]` columns.

use async_trait::async_trait;
use pocketid_oidc::storage::ClientStorage;
use pocketid_oidc::types::Client;
use pocketid_oidc::{AuthError, AuthResult};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;

use crate::{PostgresOidcStore, StorageError};

type ClientTuple = (
    String,
    String,
    String,
    Vec<String>,
    Vec<String>,
    bool,
    bool,
    bool,
    Vec<String>,
    Option<String>,
);

fn client_from_tuple(r: ClientTuple) -> Client {
    Client {
        id: r.0,
        name: r.1,
        secret_hash: r.2,
        callback_urls: r.3,
        logout_callback_urls: r.4,
        is_public: r.5,
        pkce_enabled: r.6,
        device_code_enabled: r.7,
        allowed_user_groups: r.8,
        created_by: r.9,
    }
}

#[async_trait]
impl ClientStorage for PostgresOidcStore {
    async fn find_by_id(&self, client_id: &str) -> AuthResult<Option<Client>> {
        let row: Option<ClientTuple> = query_as(
            r#"
            SELECT id, name, secret_hash, callback_urls, logout_callback_urls,
                   is_public, pkce_enabled, device_code_enabled,
                   allowed_user_groups, created_by
            FROM oidc_clients
            WHERE id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(row.map(client_from_tuple))
    }

    async fn create(&self, client: &Client) -> AuthResult<()> {
        client
            .validate()
            .map_err(|e| AuthError::invalid_request(e.to_string()))?;

        let result = query(
            r#"
            INSERT INTO oidc_clients
                (id, name, secret_hash, callback_urls, logout_callback_urls,
                 is_public, pkce_enabled, device_code_enabled,
                 allowed_user_groups, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(&client.secret_hash)
        .bind(&client.callback_urls)
        .bind(&client.logout_callback_urls)
        .bind(client.is_public)
        .bind(client.pkce_enabled)
        .bind(client.device_code_enabled)
        .bind(&client.allowed_user_groups)
        .bind(&client.created_by)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => {
                tracing::info!(client_id = %client.id, "client registered");
                Ok(())
            }
            Err(e) => match StorageError::from_insert(e, "client") {
                StorageError::Conflict(_) => Err(AuthError::invalid_request(format!(
                    "client '{}' already exists",
                    client.id
                ))),
                other => Err(other.into()),
            },
        }
    }

    async fn update(&self, client: &Client) -> AuthResult<()> {
        client
            .validate()
            .map_err(|e| AuthError::invalid_request(e.to_string()))?;

        let rows_affected = query(
            r#"
            UPDATE oidc_clients
            SET name = $2,
                secret_hash = $3,
                callback_urls = $4,
                logout_callback_urls = $5,
                is_public = $6,
                pkce_enabled = $7,
                device_code_enabled = $8,
                allowed_user_groups = $9,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(&client.secret_hash)
        .bind(&client.callback_urls)
        .bind(&client.logout_callback_urls)
        .bind(client.is_public)
        .bind(client.pkce_enabled)
        .bind(client.device_code_enabled)
        .bind(&client.allowed_user_groups)
        .execute(self.pool())
        .await
        .map_err(StorageError::from)?
        .rows_affected();

        if rows_affected == 0 {
            return Err(AuthError::invalid_client("client not found"));
        }
        Ok(())
    }

    async fn delete(&self, client_id: &str) -> AuthResult<bool> {
        let rows_affected = query("DELETE FROM oidc_clients WHERE id = $1")
            .bind(client_id)
            .execute(self.pool())
            .await
            .map_err(StorageError::from)?
            .rows_affected();

        Ok(rows_affected > 0)
    }
}
