//! Durable user consent for a client.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A user's recorded authorization of a client. One row per (user, client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAuthorizedClient {
    /// The consenting user.
    pub user_id: String,
    /// The authorized client.
    pub client_id: String,
    /// Granted scope. A later consent replaces it.
    pub scope: String,
    /// Last time the consent was used to issue a grant.
    #[serde(with = "time::serde::rfc3339")]
    pub last_used_at: OffsetDateTime,
}

/// Outcome of a consent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentUpsert {
    /// No row existed for the pair.
    Created,
    /// An existing row was overwritten.
    Updated,
}

impl ConsentUpsert {
    /// Returns `true` for a first-time consent.
    #[must_use]
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created)
    }
}
