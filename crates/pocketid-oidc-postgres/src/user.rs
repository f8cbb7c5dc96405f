//! Read-only user directory over `users`, `user_groups` and `custom_claims`.

use async_trait::async_trait;
use pocketid_oidc::AuthResult;
use pocketid_oidc::storage::UserDirectory;
use pocketid_oidc::types::{CustomClaim, User, UserGroup};
use sqlx_core::query_as::query_as;

use crate::{PostgresOidcStore, StorageError};

#[async_trait]
impl UserDirectory for PostgresOidcStore {
    async fn load_user(&self, user_id: &str) -> AuthResult<Option<User>> {
        let row: Option<(String, String, Option<String>, String, String)> = query_as(
            r#"
            SELECT id, username, email, first_name, last_name
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(StorageError::from)?;

        let Some((id, username, email, first_name, last_name)) = row else {
            return Ok(None);
        };

        let groups: Vec<(String, String)> = query_as(
            r#"
            SELECT g.id, g.name
            FROM user_groups g
            JOIN user_groups_users ug ON ug.user_group_id = g.id
            WHERE ug.user_id = $1
            ORDER BY g.name
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(StorageError::from)?;

        // (owning group, key, value); user-level claims have no group
        let claims: Vec<(Option<String>, String, String)> = query_as(
            r#"
            SELECT user_group_id, key, value
            FROM custom_claims
            WHERE user_id = $1
               OR user_group_id IN (
                   SELECT user_group_id FROM user_groups_users WHERE user_id = $1
               )
            ORDER BY key
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(StorageError::from)?;

        let claims_for = |group: Option<&str>| -> Vec<CustomClaim> {
            claims
                .iter()
                .filter(|(owner, _, _)| owner.as_deref() == group)
                .map(|(_, key, value)| CustomClaim::new(key, value))
                .collect()
        };

        Ok(Some(User {
            custom_claims: claims_for(None),
            groups: groups
                .into_iter()
                .map(|(group_id, name)| UserGroup {
                    custom_claims: claims_for(Some(&group_id)),
                    id: group_id,
                    name,
                })
                .collect(),
            id,
            username,
            email,
            first_name,
            last_name,
        }))
    }
}
