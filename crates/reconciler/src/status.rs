//! Records successful syncs on the declaration's status subresource.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cmsync_api::{ConfigMapSyncStatus, ObjectKey};
use tracing::{debug, instrument};

use crate::error::{Error, Result, StoreError};
use crate::store::DeclarationStore;

/// Writes `lastSyncTime` after a successful copy.
///
/// Conflicts with concurrent status writers are retried here, against a fresh
/// read of the declaration, without re-running the copy.
pub struct StatusWriter {
    store: Arc<dyn DeclarationStore>,
    max_attempts: u32,
}

impl StatusWriter {
    /// Create a status writer making at most `max_attempts` writes per sync.
    pub fn new(store: Arc<dyn DeclarationStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Maximum writes per recorded sync.
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Record that the declaration at `generation` was synced at `at`.
    ///
    /// Returns `Ok(false)` if the declaration disappeared in the meantime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StatusWrite`] if the store fails, or if every attempt
    /// lost a conflict.
    #[instrument(skip_all, fields(declaration = %key))]
    pub async fn record_sync(
        &self,
        key: &ObjectKey,
        at: DateTime<Utc>,
        generation: Option<i64>,
    ) -> Result<bool> {
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            let write_failed = |source: StoreError| Error::StatusWrite {
                key: key.clone(),
                attempts,
                source,
            };

            let Some(current) = self.store.get(key).await.map_err(write_failed)? else {
                debug!("Declaration gone before status write");
                return Ok(false);
            };
            let status = ConfigMapSyncStatus {
                last_sync_time: Some(at),
                observed_generation: generation,
            };

            match self.store.update_status(&current, status).await {
                Ok(()) => {
                    debug!(attempts, "Recorded sync time");
                    return Ok(true);
                }
                Err(StoreError::NotFound { .. }) => return Ok(false),
                Err(e) if e.is_conflict() && attempts < self.max_attempts => {
                    debug!(attempts, error = %e, "Status write conflicted, retrying");
                }
                Err(e) => return Err(write_failed(e)),
            }
        }
    }
}
