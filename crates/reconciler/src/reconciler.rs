//! Reconciler implementation.

use std::sync::Arc;

use chrono::Utc;
use cmsync_api::ObjectKey;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::status::StatusWriter;
use crate::store::{DeclarationStore, ResourceAccessor};
use crate::types::{ReconcileOutcome, ResourceData, SyncAction, WriteOperation};

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Whether to write `lastSyncTime` after each successful pass.
    pub record_status: bool,
    /// Maximum status writes per pass when racing other status writers.
    pub status_max_attempts: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            record_status: true,
            status_max_attempts: 3,
        }
    }
}

/// Level-triggered reconciler for `ConfigMapSync` declarations.
///
/// Holds no state between passes: every call re-reads the declaration, the
/// source and the destination, so any replica may run any pass in any order.
pub struct Reconciler {
    declarations: Arc<dyn DeclarationStore>,
    resources: Arc<dyn ResourceAccessor>,
    status: StatusWriter,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        declarations: Arc<dyn DeclarationStore>,
        resources: Arc<dyn ResourceAccessor>,
        config: ReconcilerConfig,
    ) -> Self {
        let status = StatusWriter::new(declarations.clone(), config.status_max_attempts);
        Self {
            declarations,
            resources,
            status,
            config,
        }
    }

    /// Run one convergence pass for the declaration identified by `key`.
    ///
    /// A declaration that no longer exists yields
    /// [`ReconcileOutcome::DeclarationGone`]. Status is written only when the
    /// destination changed or the current generation has no recorded sync.
    /// Status write failures are logged and reported in the outcome; they
    /// never fail the pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the declaration cannot be read or is invalid, the
    /// source is missing or unreadable, or the destination cannot be read or
    /// written. Nothing is retried here.
    #[instrument(skip_all, fields(declaration = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        let declaration = self
            .declarations
            .get(key)
            .await
            .map_err(|source| Error::DeclarationUnavailable {
                key: key.clone(),
                source,
            })?;
        let Some(declaration) = declaration else {
            debug!("Declaration not found, nothing to do");
            return Ok(ReconcileOutcome::DeclarationGone {
                declaration: key.clone(),
            });
        };

        declaration
            .spec
            .validate()
            .map_err(|source| Error::InvalidDeclaration {
                key: key.clone(),
                source,
            })?;

        let source = declaration.source_key();
        let destination = declaration.destination_key();

        let data = match self.resources.get(&source).await {
            Ok(Some(data)) => data,
            Ok(None) => return Err(Error::source_unavailable(&source, "not found")),
            Err(e) => return Err(Error::source_unavailable(&source, e.to_string())),
        };

        let action = self.converge(key, &destination, &data).await?;

        // A status write bumps the declaration's resourceVersion and fires its
        // watch, so skip it when nothing changed and this generation is recorded.
        let status_stale = action.wrote() || !declaration.status_is_current();
        let status_recorded = if self.config.record_status && status_stale {
            self.record_status(key, declaration.metadata.generation).await
        } else {
            false
        };

        let outcome = ReconcileOutcome::Converged {
            declaration: key.clone(),
            source,
            destination,
            action,
            status_recorded,
        };
        debug!(outcome = %outcome.description(), "Pass complete");
        Ok(outcome)
    }

    /// Make the destination hold `data`, writing only when it differs.
    async fn converge(
        &self,
        declaration: &ObjectKey,
        destination: &ObjectKey,
        data: &ResourceData,
    ) -> Result<SyncAction> {
        let current = self.resources.get(destination).await.map_err(|source| {
            Error::DestinationUnavailable {
                key: destination.clone(),
                source,
            }
        })?;

        match current {
            None => {
                info!(
                    destination = %destination,
                    keys = data.len(),
                    "Creating ConfigMap in destination namespace"
                );
                self.resources
                    .create(destination, data, declaration)
                    .await
                    .map_err(|e| Error::destination_write(destination, WriteOperation::Create, e))?;
                Ok(SyncAction::Created)
            }
            Some(existing) if existing == *data => {
                debug!(destination = %destination, "Destination already matches source");
                Ok(SyncAction::Unchanged)
            }
            Some(_) => {
                info!(
                    destination = %destination,
                    keys = data.len(),
                    "Updating ConfigMap in destination namespace"
                );
                self.resources
                    .update(destination, data)
                    .await
                    .map_err(|e| Error::destination_write(destination, WriteOperation::Update, e))?;
                Ok(SyncAction::Updated)
            }
        }
    }

    async fn record_status(&self, key: &ObjectKey, generation: Option<i64>) -> bool {
        match self.status.record_sync(key, Utc::now(), generation).await {
            Ok(recorded) => recorded,
            Err(e) => {
                warn!(error = %e, "Destination converged but sync status was not recorded");
                false
            }
        }
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    declarations: Option<Arc<dyn DeclarationStore>>,
    resources: Option<Arc<dyn ResourceAccessor>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            declarations: None,
            resources: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the declaration store.
    #[must_use]
    pub fn with_declarations(mut self, store: Arc<dyn DeclarationStore>) -> Self {
        self.declarations = Some(store);
        self
    }

    /// Set the resource accessor.
    #[must_use]
    pub fn with_resources(mut self, accessor: Arc<dyn ResourceAccessor>) -> Self {
        self.resources = Some(accessor);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable/disable status recording.
    #[must_use]
    pub fn record_status(mut self, enabled: bool) -> Self {
        self.config.record_status = enabled;
        self
    }

    /// Set the status write budget.
    #[must_use]
    pub fn status_max_attempts(mut self, attempts: u32) -> Self {
        self.config.status_max_attempts = attempts;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a store is missing.
    pub fn build(self) -> Result<Reconciler> {
        let declarations = self
            .declarations
            .ok_or_else(|| Error::invalid_config("declaration store is required"))?;
        let resources = self
            .resources
            .ok_or_else(|| Error::invalid_config("resource accessor is required"))?;
        Ok(Reconciler::new(declarations, resources, self.config))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
