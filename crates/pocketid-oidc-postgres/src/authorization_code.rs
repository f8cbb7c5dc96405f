//! PostgreSQL storage for one-time authorization codes.
//!
//! Redemption is a single `DELETE ... RETURNING`, so a code can be observed
//! by at most one caller.

use async_trait::async_trait;
use pocketid_oidc::AuthResult;
use pocketid_oidc::oauth::PkceChallengeMethod;
use pocketid_oidc::storage::AuthorizationCodeStorage;
use pocketid_oidc::types::AuthorizationCode;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;

use crate::{PostgresOidcStore, StorageError, StorageResult};

type CodeTuple = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    OffsetDateTime,
    OffsetDateTime,
);

fn code_from_tuple(r: CodeTuple) -> StorageResult<AuthorizationCode> {
    let code_challenge_method = PkceChallengeMethod::parse(&r.6).map_err(|_| {
        StorageError::corrupt(format!("unknown code_challenge_method '{}'", r.6))
    })?;
    Ok(AuthorizationCode {
        code: r.0,
        client_id: r.1,
        user_id: r.2,
        scope: r.3,
        nonce: r.4,
        code_challenge: r.5,
        code_challenge_method,
        created_at: r.7,
        expires_at: r.8,
    })
}

#[async_trait]
impl AuthorizationCodeStorage for PostgresOidcStore {
    async fn create(&self, code: &AuthorizationCode) -> AuthResult<()> {
        query(
            r#"
            INSERT INTO oidc_authorization_codes
                (code, client_id, user_id, scope, nonce, code_challenge,
                 code_challenge_method, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&code.code)
        .bind(&code.client_id)
        .bind(&code.user_id)
        .bind(&code.scope)
        .bind(&code.nonce)
        .bind(&code.code_challenge)
        .bind(code.code_challenge_method.as_str())
        .bind(code.created_at)
        .bind(code.expires_at)
        .execute(self.pool())
        .await
        .map_err(|e| StorageError::from_insert(e, "authorization code"))?;

        Ok(())
    }

    async fn take(&self, code: &str) -> AuthResult<Option<AuthorizationCode>> {
        let row: Option<CodeTuple> = query_as(
            r#"
            DELETE FROM oidc_authorization_codes
            WHERE code = $1
            RETURNING code, client_id, user_id, scope, nonce, code_challenge,
                      code_challenge_method, created_at, expires_at
            "#,
        )
        .bind(code)
        .fetch_optional(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(row.map(code_from_tuple).transpose()?)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let result = query("DELETE FROM oidc_authorization_codes WHERE expires_at <= $1")
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(StorageError::from)?;

        Ok(result.rows_affected())
    }
}
