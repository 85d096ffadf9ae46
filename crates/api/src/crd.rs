//! The `ConfigMapSync` custom resource.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::SpecError;
use crate::key::ObjectKey;

/// API group of the declaration kind.
pub const API_GROUP: &str = "apps.gallindic.com";

/// API version of the declaration kind.
pub const API_VERSION: &str = "v1";

/// Label stamped on destinations created by this controller.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGER_NAME: &str = "cmsync";

/// Annotation pointing from a destination back to the declaration that created it.
pub const DECLARATION_ANNOTATION: &str = "apps.gallindic.com/declaration";

/// Desired state of a `ConfigMapSync`.
///
/// The ConfigMap named `configMapName` in `sourceNamespace` is copied to a
/// ConfigMap of the same name in `destinationNamespace`.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "apps.gallindic.com",
    version = "v1",
    kind = "ConfigMapSync",
    namespaced,
    status = "ConfigMapSyncStatus",
    shortname = "cms",
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name":"Source","type":"string","jsonPath":".spec.sourceNamespace"}"#,
    printcolumn = r#"{"name":"Destination","type":"string","jsonPath":".spec.destinationNamespace"}"#,
    printcolumn = r#"{"name":"ConfigMap","type":"string","jsonPath":".spec.configMapName"}"#,
    printcolumn = r#"{"name":"Last Sync","type":"date","jsonPath":".status.lastSyncTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapSyncSpec {
    /// Namespace holding the ConfigMap to copy from.
    pub source_namespace: String,
    /// Namespace to copy into.
    pub destination_namespace: String,
    /// Name shared by the source and destination ConfigMap.
    pub config_map_name: String,
}

/// Observed state of a `ConfigMapSync`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapSyncStatus {
    /// When the destination was last brought in line with the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// `metadata.generation` of the spec that sync was performed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ConfigMapSyncSpec {
    /// Create a spec.
    pub fn new(
        source_namespace: impl Into<String>,
        destination_namespace: impl Into<String>,
        config_map_name: impl Into<String>,
    ) -> Self {
        Self {
            source_namespace: source_namespace.into(),
            destination_namespace: destination_namespace.into(),
            config_map_name: config_map_name.into(),
        }
    }

    /// Check that the spec names a usable source and a distinct destination.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] if a field is empty or both namespaces are equal.
    pub fn validate(&self) -> Result<(), SpecError> {
        let fields = [
            ("sourceNamespace", &self.source_namespace),
            ("destinationNamespace", &self.destination_namespace),
            ("configMapName", &self.config_map_name),
        ];
        if let Some(&(field, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(SpecError::EmptyField { field });
        }
        if self.source_namespace == self.destination_namespace {
            return Err(SpecError::SameNamespace {
                namespace: self.source_namespace.clone(),
            });
        }
        Ok(())
    }
}

impl ConfigMapSync {
    /// Key of the ConfigMap to copy from.
    pub fn source_key(&self) -> ObjectKey {
        ObjectKey::new(&self.spec.source_namespace, &self.spec.config_map_name)
    }

    /// Key of the ConfigMap to copy into.
    pub fn destination_key(&self) -> ObjectKey {
        ObjectKey::new(&self.spec.destination_namespace, &self.spec.config_map_name)
    }

    /// Last recorded successful sync, if any.
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.last_sync_time)
    }

    /// Whether the status already records a sync of the current generation.
    pub fn status_is_current(&self) -> bool {
        self.status.as_ref().is_some_and(|status| {
            status.last_sync_time.is_some()
                && status.observed_generation == self.metadata.generation
        })
    }
}
