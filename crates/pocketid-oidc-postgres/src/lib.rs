//! PostgreSQL storage backend for pocketid-oidc
//!
//! Provides persistent storage for:
//!
//! - OIDC clients (`oidc_clients`)
//! - authorization codes and device codes
//! - user consent (`user_authorized_oidc_clients`)
//! - the encrypted signing key and generic secrets, including the
//!   transaction an encryption key rotation runs in
//! - read-only access to users, groups and custom claims
//!
//! The schema ships as embedded migrations, see [`migrations::run`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pocketid_oidc::OidcStores;
//! use pocketid_oidc_postgres::PostgresOidcStore;
//!
//! let store = PostgresOidcStore::connect("postgres://localhost/pocketid", 10).await?;
//! store.migrate().await?;
//! let stores = OidcStores::from_backend(Arc::new(store));
//! ```

pub mod authorization_code;
pub mod client;
pub mod consent;
pub mod device_code;
pub mod key_material;
pub mod migrations;
pub mod user;

use std::sync::Arc;

use pocketid_oidc::AuthError;
use sqlx_core::pool::{Pool, PoolOptions};
use sqlx_postgres::Postgres;

pub use key_material::PostgresRotation;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by the PostgreSQL backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Row already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored column holds a value the domain types reject.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Applying the embedded migrations failed.
    #[error("Migration failed: {0}")]
    Migration(String),
}

impl StorageError {
    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create a `Corrupt` error.
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Maps unique violations to [`StorageError::Conflict`].
    pub(crate) fn from_insert(err: sqlx_core::Error, what: &str) -> Self {
        if let sqlx_core::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return Self::conflict(format!("{what} already exists"));
        }
        Self::from(err)
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        if err.is_conflict() {
            tracing::debug!(error = %err, "storage conflict");
        } else {
            tracing::error!(error = %err, "postgres storage failure");
        }
        AuthError::storage(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// PostgreSQL OIDC Store
// =============================================================================

/// PostgreSQL backend implementing every storage trait of `pocketid-oidc`.
///
/// Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresOidcStore {
    pool: Arc<PgPool>,
}

impl PostgresOidcStore {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PoolOptions::<Postgres>::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "connected to postgres");
        Ok(Self::new(Arc::new(pool)))
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> StorageResult<()> {
        migrations::run(&self.pool).await
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Tests
// =============================================================================
