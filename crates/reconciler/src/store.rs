//! Declaration store and resource accessor traits, with in-memory implementations.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use cmsync_api::{
    ConfigMapSync, ConfigMapSyncStatus, ObjectKey, DECLARATION_ANNOTATION, MANAGED_BY_LABEL,
    MANAGER_NAME,
};
use kube::ResourceExt;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::types::ResourceData;

/// Calls a store or accessor can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Get,
    Create,
    Update,
    UpdateStatus,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::UpdateStatus => write!(f, "update status of"),
        }
    }
}

/// Durable storage of `ConfigMapSync` declarations.
#[async_trait]
pub trait DeclarationStore: Send + Sync {
    /// Fetch a declaration. `Ok(None)` when it does not exist.
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<ConfigMapSync>>;

    /// Replace the status subresource of `declaration`, leaving the spec alone.
    ///
    /// The write is conditional on `declaration`'s resource version and
    /// fails with [`StoreError::Conflict`] if the object changed since.
    async fn update_status(
        &self,
        declaration: &ConfigMapSync,
        status: ConfigMapSyncStatus,
    ) -> StoreResult<()>;
}

/// Get/create/update access to namespaced ConfigMap data.
#[async_trait]
pub trait ResourceAccessor: Send + Sync {
    /// Fetch the data of a resource. `Ok(None)` when it does not exist.
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<ResourceData>>;

    /// Create a resource holding `data`, recording which declaration owns it.
    async fn create(
        &self,
        key: &ObjectKey,
        data: &ResourceData,
        declaration: &ObjectKey,
    ) -> StoreResult<()>;

    /// Replace the data of an existing resource.
    async fn update(&self, key: &ObjectKey, data: &ResourceData) -> StoreResult<()>;
}

/// Key a status write is addressed to. Fails for objects without a namespace.
pub(crate) fn status_key(declaration: &ConfigMapSync) -> StoreResult<ObjectKey> {
    ObjectKey::of(declaration).ok_or_else(|| {
        StoreError::backend(
            StoreOperation::UpdateStatus.to_string(),
            &ObjectKey::new("", declaration.name_any()),
            "object has no namespace",
        )
    })
}

/// Injected failures, keyed by operation and object.
#[derive(Default)]
struct FaultTable {
    faults: RwLock<HashMap<(StoreOperation, ObjectKey), StoreError>>,
}

impl FaultTable {
    async fn set(&self, operation: StoreOperation, key: ObjectKey, error: StoreError) {
        self.faults.write().await.insert((operation, key), error);
    }

    async fn clear(&self) {
        self.faults.write().await.clear();
    }

    async fn check(&self, operation: StoreOperation, key: &ObjectKey) -> StoreResult<()> {
        match self.faults.read().await.get(&(operation, key.clone())) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredResource {
    data: ResourceData,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    resource_version: u64,
}

/// In-memory ConfigMap store for testing.
#[derive(Default)]
pub struct InMemoryResourceStore {
    objects: RwLock<HashMap<ObjectKey, StoredResource>>,
    next_version: AtomicU64,
    writes: AtomicUsize,
    faults: FaultTable,
}

impl InMemoryResourceStore {
    /// Create a new in-memory resource store.
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    /// Write a resource as an external actor would. Not counted as a controller write.
    pub async fn put(&self, key: ObjectKey, data: ResourceData) {
        let resource_version = self.bump_version();
        let mut objects = self.objects.write().await;
        let entry = objects.entry(key).or_insert_with(|| StoredResource {
            data: ResourceData::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            resource_version,
        });
        entry.data = data;
        entry.resource_version = resource_version;
    }

    /// Current data of a resource.
    pub async fn data(&self, key: &ObjectKey) -> Option<ResourceData> {
        self.objects.read().await.get(key).map(|r| r.data.clone())
    }

    /// Current resource version of a resource.
    pub async fn resource_version(&self, key: &ObjectKey) -> Option<u64> {
        self.objects.read().await.get(key).map(|r| r.resource_version)
    }

    /// Labels of a resource.
    pub async fn labels(&self, key: &ObjectKey) -> Option<BTreeMap<String, String>> {
        self.objects.read().await.get(key).map(|r| r.labels.clone())
    }

    /// Annotations of a resource.
    pub async fn annotations(&self, key: &ObjectKey) -> Option<BTreeMap<String, String>> {
        self.objects.read().await.get(key).map(|r| r.annotations.clone())
    }

    /// Number of create and update calls that succeeded.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every `operation` on `key` fail with `error` until cleared.
    pub async fn fail(&self, operation: StoreOperation, key: ObjectKey, error: StoreError) {
        self.faults.set(operation, key, error).await;
    }

    /// Remove all injected failures.
    pub async fn clear_faults(&self) {
        self.faults.clear().await;
    }
}

#[async_trait]
impl ResourceAccessor for InMemoryResourceStore {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<ResourceData>> {
        self.faults.check(StoreOperation::Get, key).await?;
        Ok(self.data(key).await)
    }

    async fn create(
        &self,
        key: &ObjectKey,
        data: &ResourceData,
        declaration: &ObjectKey,
    ) -> StoreResult<()> {
        self.faults.check(StoreOperation::Create, key).await?;
        let resource_version = self.bump_version();
        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Err(StoreError::already_exists(key));
        }
        objects.insert(
            key.clone(),
            StoredResource {
                data: data.clone(),
                labels: BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGER_NAME.to_string())]),
                annotations: BTreeMap::from([(
                    DECLARATION_ANNOTATION.to_string(),
                    declaration.to_string(),
                )]),
                resource_version,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, key: &ObjectKey, data: &ResourceData) -> StoreResult<()> {
        self.faults.check(StoreOperation::Update, key).await?;
        let resource_version = self.bump_version();
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(key))?;
        stored.data = data.clone();
        stored.resource_version = resource_version;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory declaration store for testing.
///
/// Tracks `resourceVersion` and `generation` the way the API server does, so
/// conditional status writes behave realistically.
#[derive(Default)]
pub struct InMemoryDeclarationStore {
    objects: RwLock<HashMap<ObjectKey, ConfigMapSync>>,
    next_version: AtomicU64,
    pending_conflicts: RwLock<HashMap<ObjectKey, u32>>,
    status_writes: AtomicUsize,
    faults: FaultTable,
}

impl InMemoryDeclarationStore {
    /// Create a new in-memory declaration store.
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&self) -> String {
        self.next_version
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1)
            .to_string()
    }

    /// Create or replace a declaration's spec, as `kubectl apply` would.
    ///
    /// Returns the stored key, or `None` if the object has no namespace.
    pub async fn apply(&self, mut declaration: ConfigMapSync) -> Option<ObjectKey> {
        let key = ObjectKey::of(&declaration)?;
        let resource_version = self.bump_version();
        let mut objects = self.objects.write().await;
        match objects.get_mut(&key) {
            Some(existing) => {
                if existing.spec != declaration.spec {
                    existing.metadata.generation =
                        Some(existing.metadata.generation.unwrap_or(0).saturating_add(1));
                }
                existing.spec = declaration.spec;
                existing.metadata.resource_version = Some(resource_version);
            }
            None => {
                declaration.metadata.generation = Some(1);
                declaration.metadata.resource_version = Some(resource_version);
                objects.insert(key.clone(), declaration);
            }
        }
        Some(key)
    }

    /// Delete a declaration.
    pub async fn delete(&self, key: &ObjectKey) -> Option<ConfigMapSync> {
        self.objects.write().await.remove(key)
    }

    /// Current status of a declaration.
    pub async fn status(&self, key: &ObjectKey) -> Option<ConfigMapSyncStatus> {
        self.objects
            .read()
            .await
            .get(key)
            .and_then(|d| d.status.clone())
    }

    /// Current resource version of a declaration.
    pub async fn resource_version(&self, key: &ObjectKey) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key)
            .and_then(|d| d.metadata.resource_version.clone())
    }

    /// Number of status writes that succeeded.
    pub fn status_write_count(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Make the next `count` status writes for `key` lose a race to another writer.
    pub async fn inject_status_conflicts(&self, key: ObjectKey, count: u32) {
        self.pending_conflicts.write().await.insert(key, count);
    }

    /// Make every `operation` on `key` fail with `error` until cleared.
    pub async fn fail(&self, operation: StoreOperation, key: ObjectKey, error: StoreError) {
        self.faults.set(operation, key, error).await;
    }

    /// Remove all injected failures.
    pub async fn clear_faults(&self) {
        self.faults.clear().await;
    }

    /// Consume one injected conflict for `key`, if any remain.
    async fn take_conflict(&self, key: &ObjectKey) -> bool {
        let mut pending = self.pending_conflicts.write().await;
        match pending.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining = remaining.saturating_sub(1);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl DeclarationStore for InMemoryDeclarationStore {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<ConfigMapSync>> {
        self.faults.check(StoreOperation::Get, key).await?;
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn update_status(
        &self,
        declaration: &ConfigMapSync,
        status: ConfigMapSyncStatus,
    ) -> StoreResult<()> {
        let key = status_key(declaration)?;
        self.faults.check(StoreOperation::UpdateStatus, &key).await?;

        if self.take_conflict(&key).await {
            // Another writer got there first.
            let resource_version = self.bump_version();
            if let Some(stored) = self.objects.write().await.get_mut(&key) {
                stored.metadata.resource_version = Some(resource_version);
            }
            return Err(StoreError::conflict(&key, "object has been modified"));
        }

        let resource_version = self.bump_version();
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(&key))?;
        if stored.metadata.resource_version != declaration.metadata.resource_version {
            return Err(StoreError::conflict(&key, "object has been modified"));
        }
        stored.status = Some(status);
        stored.metadata.resource_version = Some(resource_version);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use cmsync_api::ConfigMapSyncSpec;

    fn data(pairs: &[(&str, &str)]) -> ResourceData {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn declaration(name: &str) -> ConfigMapSync {
        let mut sync = ConfigMapSync::new(name, ConfigMapSyncSpec::new("src", "dst", "settings"));
        sync.metadata.namespace = Some("ops".into());
        sync
    }

    #[tokio::test]
    async fn test_resource_create_stamps_owner() {
        let store = InMemoryResourceStore::new();
        let key = ObjectKey::new("dst", "settings");
        let owner = ObjectKey::new("ops", "mirror");

        store.create(&key, &data(&[("a", "1")]), &owner).await.unwrap();

        assert_eq!(store.data(&key).await, Some(data(&[("a", "1")])));
        let labels = store.labels(&key).await.unwrap();
        assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some(MANAGER_NAME));
        let annotations = store.annotations(&key).await.unwrap();
        assert_eq!(
            annotations.get(DECLARATION_ANNOTATION).map(String::as_str),
            Some("ops/mirror")
        );
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_resource_create_twice_fails() {
        let store = InMemoryResourceStore::new();
        let key = ObjectKey::new("dst", "settings");
        let owner = ObjectKey::new("ops", "mirror");
        store.create(&key, &data(&[]), &owner).await.unwrap();

        let err = store.create(&key, &data(&[]), &owner).await.unwrap_err();
        assert_eq!(err, StoreError::already_exists(&key));
    }

    #[tokio::test]
    async fn test_resource_update_missing_fails() {
        let store = InMemoryResourceStore::new();
        let key = ObjectKey::new("dst", "settings");
        let err = store.update(&key, &data(&[("a", "1")])).await.unwrap_err();
        assert_eq!(err, StoreError::not_found(&key));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_resource_update_bumps_version() {
        let store = InMemoryResourceStore::new();
        let key = ObjectKey::new("dst", "settings");
        store.put(key.clone(), data(&[("a", "1")])).await;
        let before = store.resource_version(&key).await.unwrap();

        store.update(&key, &data(&[("a", "2")])).await.unwrap();

        assert!(store.resource_version(&key).await.unwrap() > before);
        assert_eq!(store.data(&key).await, Some(data(&[("a", "2")])));
    }

    #[tokio::test]
    async fn test_injected_fault_until_cleared() {
        let store = InMemoryResourceStore::new();
        let key = ObjectKey::new("src", "settings");
        store.put(key.clone(), data(&[("a", "1")])).await;
        store
            .fail(StoreOperation::Get, key.clone(), StoreError::backend("get", &key, "timeout"))
            .await;

        assert!(store.get(&key).await.is_err());
        store.clear_faults().await;
        assert!(store.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_apply_tracks_generation() {
        let store = InMemoryDeclarationStore::new();
        let key = store.apply(declaration("mirror")).await.unwrap();
        let first = store.get(&key).await.unwrap().unwrap();
        assert_eq!(first.metadata.generation, Some(1));

        let mut changed = declaration("mirror");
        changed.spec.config_map_name = "other".into();
        store.apply(changed).await;
        let second = store.get(&key).await.unwrap().unwrap();
        assert_eq!(second.metadata.generation, Some(2));
        assert_ne!(first.metadata.resource_version, second.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_status_write_requires_fresh_version() {
        let store = InMemoryDeclarationStore::new();
        let key = store.apply(declaration("mirror")).await.unwrap();
        let stale = store.get(&key).await.unwrap().unwrap();
        store.apply(declaration("mirror")).await;

        let err = store
            .update_status(&stale, ConfigMapSyncStatus::default())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let fresh = store.get(&key).await.unwrap().unwrap();
        store
            .update_status(&fresh, ConfigMapSyncStatus::default())
            .await
            .unwrap();
        assert_eq!(store.status_write_count(), 1);
    }

    #[tokio::test]
    async fn test_status_write_leaves_spec_alone() {
        let store = InMemoryDeclarationStore::new();
        let key = store.apply(declaration("mirror")).await.unwrap();
        let mut current = store.get(&key).await.unwrap().unwrap();
        current.spec.config_map_name = "tampered".into();

        store
            .update_status(&current, ConfigMapSyncStatus::default())
            .await
            .unwrap();

        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.spec.config_map_name, "settings");
        assert!(stored.status.is_some());
    }
}
