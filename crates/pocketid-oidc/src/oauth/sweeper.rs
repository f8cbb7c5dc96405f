//! Removal of expired one-time artifacts.
//!
//! Expired codes are already unusable; sweeping only reclaims their rows.
//! Run it from an operator-scheduled job.

use std::time::Duration;

use time::OffsetDateTime;

use crate::AuthResult;
use crate::oauth::OidcStores;
use crate::storage::with_deadline;

/// Rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Authorization codes deleted.
    pub codes: u64,
    /// Device codes deleted.
    pub device_codes: u64,
}

/// Deletes expired authorization codes and device codes.
#[derive(Debug)]
pub struct ArtifactSweeper {
    stores: OidcStores,
    timeout: Duration,
}

impl ArtifactSweeper {
    /// Creates a sweeper.
    #[must_use]
    pub fn new(stores: OidcStores, timeout: Duration) -> Self {
        Self { stores, timeout }
    }

    /// Deletes everything that expired before `now`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if a delete fails.
    pub async fn sweep(&self, now: OffsetDateTime) -> AuthResult<SweepReport> {
        let codes = with_deadline(self.timeout, self.stores.codes.delete_expired(now)).await?;
        let device_codes =
            with_deadline(self.timeout, self.stores.device_codes.delete_expired(now)).await?;

        tracing::info!(codes, device_codes, "swept expired grants");
        Ok(SweepReport {
            codes,
            device_codes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::test_support::{Harness, public_client};

    #[tokio::test]
    async fn test_sweeps_only_expired_rows() {
        let h = Harness::new().await;
        h.add_client(public_client("tv")).await;
        let devices = h.devices();
        devices.create_device_authorization("tv", "openid").await.unwrap();
        devices.create_device_authorization("tv", "openid").await.unwrap();

        let sweeper = ArtifactSweeper::new(h.stores.clone(), h.timeout());
        let report = sweeper.sweep(OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(report, SweepReport::default());

        let later = OffsetDateTime::now_utc() + time::Duration::hours(1);
        let report = sweeper.sweep(later).await.unwrap();
        assert_eq!(report.device_codes, 2);
        assert_eq!(report.codes, 0);
        assert_eq!(h.store.device_code_count().await, 0);
    }
}
