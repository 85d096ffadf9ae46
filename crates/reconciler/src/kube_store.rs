//! Declaration store and ConfigMap accessor backed by the Kubernetes API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use cmsync_api::{
    ConfigMapSync, ConfigMapSyncStatus, ObjectKey, DECLARATION_ANNOTATION, MANAGED_BY_LABEL,
    MANAGER_NAME,
};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::store::{DeclarationStore, ResourceAccessor, StoreOperation, status_key};
use crate::types::ResourceData;

/// Translate a client error into the store taxonomy.
///
/// 404 becomes `NotFound`, 409 becomes `AlreadyExists` on create and
/// `Conflict` otherwise.
pub fn store_error(operation: StoreOperation, key: &ObjectKey, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 404 => StoreError::not_found(key),
        kube::Error::Api(response) if response.code == 409 => match operation {
            StoreOperation::Create => StoreError::already_exists(key),
            _ => StoreError::conflict(key, response.message),
        },
        other => StoreError::backend(operation.to_string(), key, other.to_string()),
    }
}

/// `ConfigMapSync` objects read and written through the API server.
#[derive(Clone)]
pub struct KubeDeclarationStore {
    client: Client,
}

impl KubeDeclarationStore {
    /// Create a store using `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMapSync> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl DeclarationStore for KubeDeclarationStore {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<ConfigMapSync>> {
        self.api(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| store_error(StoreOperation::Get, key, e))
    }

    async fn update_status(
        &self,
        declaration: &ConfigMapSync,
        status: ConfigMapSyncStatus,
    ) -> StoreResult<()> {
        let key = status_key(declaration)?;
        // resourceVersion in the body makes the API server reject stale writes with 409.
        let patch = json!({
            "metadata": { "resourceVersion": declaration.resource_version() },
            "status": status,
        });
        trace!(declaration = %key, "Patching status subresource");
        self.api(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| store_error(StoreOperation::UpdateStatus, &key, e))
    }
}

/// Build the destination ConfigMap created for `declaration`.
pub fn destination_config_map(
    key: &ObjectKey,
    data: &ResourceData,
    declaration: &ObjectKey,
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGER_NAME.to_string(),
            )])),
            annotations: Some(BTreeMap::from([(
                DECLARATION_ANNOTATION.to_string(),
                declaration.to_string(),
            )])),
            ..ObjectMeta::default()
        },
        data: Some(data.clone()),
        ..ConfigMap::default()
    }
}

/// ConfigMaps read and written through the API server.
#[derive(Clone)]
pub struct KubeConfigMapAccessor {
    client: Client,
}

impl KubeConfigMapAccessor {
    /// Create an accessor using `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ResourceAccessor for KubeConfigMapAccessor {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<ResourceData>> {
        self.api(&key.namespace)
            .get_opt(&key.name)
            .await
            .map(|found| found.map(|cm| cm.data.unwrap_or_default()))
            .map_err(|e| store_error(StoreOperation::Get, key, e))
    }

    async fn create(
        &self,
        key: &ObjectKey,
        data: &ResourceData,
        declaration: &ObjectKey,
    ) -> StoreResult<()> {
        let config_map = destination_config_map(key, data, declaration);
        self.api(&key.namespace)
            .create(&PostParams::default(), &config_map)
            .await
            .map(|_| ())
            .map_err(|e| store_error(StoreOperation::Create, key, e))
    }

    async fn update(&self, key: &ObjectKey, data: &ResourceData) -> StoreResult<()> {
        let api = self.api(&key.namespace);
        // Replace only `data` on the live object so metadata set by others survives.
        let mut config_map = api
            .get(&key.name)
            .await
            .map_err(|e| store_error(StoreOperation::Update, key, e))?;
        config_map.data = Some(data.clone());
        api.replace(&key.name, &PostParams::default(), &config_map)
            .await
            .map(|_| ())
            .map_err(|e| store_error(StoreOperation::Update, key, e))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("{reason} happened"),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn test_not_found_maps_to_not_found() {
        let key = ObjectKey::new("src", "settings");
        let err = store_error(StoreOperation::Get, &key, api_error(404, "NotFound"));
        assert_eq!(err, StoreError::not_found(&key));
    }

    #[test]
    fn test_conflict_depends_on_operation() {
        let key = ObjectKey::new("dst", "settings");
        let on_create = store_error(StoreOperation::Create, &key, api_error(409, "AlreadyExists"));
        assert_eq!(on_create, StoreError::already_exists(&key));

        let on_update = store_error(StoreOperation::Update, &key, api_error(409, "Conflict"));
        assert!(on_update.is_conflict());
    }

    #[test]
    fn test_other_codes_are_backend_errors() {
        let key = ObjectKey::new("dst", "settings");
        let err = store_error(StoreOperation::Update, &key, api_error(403, "Forbidden"));
        assert!(matches!(err, StoreError::Backend { ref operation, .. } if operation == "update"));
    }

    #[test]
    fn test_status_key_requires_namespace() {
        let mut sync = ConfigMapSync::new(
            "mirror",
            cmsync_api::ConfigMapSyncSpec::new("src", "dst", "settings"),
        );

        let err = status_key(&sync).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Backend { ref operation, ref reason, .. }
                if operation == "update status of" && reason == "object has no namespace"
        ));

        sync.metadata.namespace = Some("ops".into());
        assert_eq!(status_key(&sync).unwrap(), ObjectKey::new("ops", "mirror"));
    }

    #[test]
    fn test_destination_carries_back_link() {
        let key = ObjectKey::new("dst", "settings");
        let owner = ObjectKey::new("ops", "mirror");
        let data = ResourceData::from([("a".to_string(), "1".to_string())]);

        let cm = destination_config_map(&key, &data, &owner);

        assert_eq!(cm.metadata.name.as_deref(), Some("settings"));
        assert_eq!(cm.metadata.namespace.as_deref(), Some("dst"));
        assert_eq!(cm.data, Some(data));
        assert_eq!(
            cm.labels().get(MANAGED_BY_LABEL).map(String::as_str),
            Some(MANAGER_NAME)
        );
        assert_eq!(
            cm.annotations().get(DECLARATION_ANNOTATION).map(String::as_str),
            Some("ops/mirror")
        );
    }
}
