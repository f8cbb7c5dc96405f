//! Client storage trait.
//!
//! Defines the interface for client registration persistence.
//! Implementations are provided by storage backends (e.g., PostgreSQL).

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::Client;

/// Storage operations for OIDC clients.
///
/// # Example
///
/// ```ignore
/// use pocketid_oidc::storage::ClientStorage;
///
/// async fn example(storage: &impl ClientStorage) {
///     if let Some(client) = storage.find_by_id("my-app").await? {
///         println!("Found client: {}", client.name);
///     }
/// }
/// ```
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Find a client by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, client_id: &str) -> AuthResult<Option<Client>>;

    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is invalid, the ID is taken, or the
    /// storage operation fails.
    async fn create(&self, client: &Client) -> AuthResult<()>;

    /// Replace an existing client.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidClient` if the client does not exist.
    async fn update(&self, client: &Client) -> AuthResult<()>;

    /// Delete a client. Returns `true` if a row was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete(&self, client_id: &str) -> AuthResult<bool>;
}
