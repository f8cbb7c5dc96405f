//! PostgreSQL storage for user consent records.
//!
//! Records are stored in the `user_authorized_oidc_clients` table, one row per
//! (user, client).

use async_trait::async_trait;
use pocketid_oidc::AuthResult;
use pocketid_oidc::storage::ConsentStorage;
use pocketid_oidc::types::{ConsentUpsert, UserAuthorizedClient};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::{PostgresOidcStore, StorageError};

type ConsentTuple = (String, String, String, OffsetDateTime);

fn consent_from_tuple(r: ConsentTuple) -> UserAuthorizedClient {
    UserAuthorizedClient {
        user_id: r.0,
        client_id: r.1,
        scope: r.2,
        last_used_at: r.3,
    }
}

#[async_trait]
impl ConsentStorage for PostgresOidcStore {
    async fn find(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> AuthResult<Option<UserAuthorizedClient>> {
        let row: Option<ConsentTuple> = query_as(
            r#"
            SELECT user_id, client_id, scope, last_used_at
            FROM user_authorized_oidc_clients
            WHERE user_id = $1 AND client_id = $2
            "#,
        )
        .bind(user_id)
        .bind(client_id)
        .fetch_optional(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(row.map(consent_from_tuple))
    }

    async fn upsert(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &str,
        now: OffsetDateTime,
    ) -> AuthResult<ConsentUpsert> {
        // xmax is zero only on a freshly inserted tuple
        let (inserted,): (bool,) = query_as(
            r#"
            INSERT INTO user_authorized_oidc_clients
                (user_id, client_id, scope, last_used_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, client_id)
            DO UPDATE SET
                scope = EXCLUDED.scope,
                last_used_at = EXCLUDED.last_used_at
            RETURNING (xmax = 0)
            "#,
        )
        .bind(user_id)
        .bind(client_id)
        .bind(scope)
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(if inserted {
            ConsentUpsert::Created
        } else {
            ConsentUpsert::Updated
        })
    }

    async fn touch(&self, user_id: &str, client_id: &str, now: OffsetDateTime) -> AuthResult<()> {
        query(
            r#"
            UPDATE user_authorized_oidc_clients
            SET last_used_at = $3
            WHERE user_id = $1 AND client_id = $2
            "#,
        )
        .bind(user_id)
        .bind(client_id)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(())
    }

    async fn revoke(&self, user_id: &str, client_id: &str) -> AuthResult<bool> {
        let rows_affected = query(
            "DELETE FROM user_authorized_oidc_clients WHERE user_id = $1 AND client_id = $2",
        )
        .bind(user_id)
        .bind(client_id)
        .execute(self.pool())
        .await
        .map_err(StorageError::from)?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    async fn list_for_user(&self, user_id: &str) -> AuthResult<Vec<UserAuthorizedClient>> {
        let rows: Vec<ConsentTuple> = query_as(
            r#"
            SELECT user_id, client_id, scope, last_used_at
            FROM user_authorized_oidc_clients
            WHERE user_id = $1
            ORDER BY last_used_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(rows.into_iter().map(consent_from_tuple).collect())
    }
}
