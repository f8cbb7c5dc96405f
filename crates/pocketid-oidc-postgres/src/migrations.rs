//! Embedded schema migrations.
//!
//! Migrations are compiled into the binary and tracked in `_sqlx_migrations`.
//! To add one, create the SQL file under `migrations/` and append it to
//! `embedded_migrations!` below.

use std::borrow::Cow;

use sqlx_core::migrate::{Migration, MigrationType, Migrator};
use tracing::{info, instrument};

use crate::{PgPool, StorageError, StorageResult};

macro_rules! embedded_migrations {
    () => {
        &[(
            20260101000001i64,
            "oidc_schema",
            include_str!("../migrations/20260101000001_oidc_schema.sql"),
        )]
    };
}

fn build_migrations() -> Vec<Migration> {
    embedded_migrations!()
        .iter()
        .map(|(version, description, sql)| Migration {
            version: *version,
            description: Cow::Borrowed(description),
            migration_type: MigrationType::Simple,
            sql: Cow::Borrowed(sql),
            checksum: Cow::Borrowed(&[]),
            no_tx: false,
        })
        .collect()
}

/// Runs all pending migrations.
///
/// # Errors
///
/// Returns `StorageError::Migration` if a migration fails to apply.
#[instrument(skip(pool))]
pub async fn run(pool: &PgPool) -> StorageResult<()> {
    let migrator = Migrator {
        migrations: Cow::Owned(build_migrations()),
        ignore_missing: false,
        locking: true,
        no_tx: false,
    };
    info!(count = migrator.migrations.len(), "applying embedded migrations");

    migrator
        .run(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

    info!("database migrations completed");
    Ok(())
}
