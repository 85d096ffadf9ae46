//! Explicit registry of the custom resource kinds this process serves.
//!
//! The registry is built once during startup and handed by reference to
//! whatever needs to know about kinds: the controller checks its kind is
//! present before watching, and the CLI prints manifests from it.

use std::fmt;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;
use tracing::debug;

use crate::crd::ConfigMapSync;
use crate::error::{RegistryError, Result};

/// A kind known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl fmt::Display for RegisteredKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.plural, self.group, self.version)
    }
}

/// Registered kinds with their CRD manifests, in registration order.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    entries: Vec<(RegisteredKind, CustomResourceDefinition)>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every kind this crate defines.
    ///
    /// # Errors
    ///
    /// Returns an error only if the built-in kinds conflict with each other.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.register::<ConfigMapSync>()?;
        Ok(registry)
    }

    /// Register a kind.
    ///
    /// Registering the same definition twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Conflicting`] if the group/kind is already
    /// registered with a different version, plural or scope.
    pub fn register<K: CustomResourceExt>(&mut self) -> Result<RegisteredKind> {
        let crd = K::crd();
        let resource = K::api_resource();
        let candidate = RegisteredKind {
            group: resource.group,
            version: resource.version,
            kind: resource.kind,
            plural: resource.plural,
            namespaced: crd.spec.scope == "Namespaced",
        };

        if let Some(existing) = self.lookup(&candidate.group, &candidate.kind) {
            if *existing == candidate {
                return Ok(candidate);
            }
            return Err(RegistryError::conflicting(
                &candidate.group,
                &candidate.kind,
                existing.to_string(),
            ));
        }

        debug!(kind = %candidate.kind, resource = %candidate, "Registered kind");
        self.entries.push((candidate.clone(), crd));
        Ok(candidate)
    }

    /// Check whether `K` is registered.
    pub fn contains<K: CustomResourceExt>(&self) -> bool {
        let resource = K::api_resource();
        self.lookup(&resource.group, &resource.kind).is_some()
    }

    /// Get the registration for `K`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] if `K` was never registered.
    pub fn require<K: CustomResourceExt>(&self) -> Result<&RegisteredKind> {
        let resource = K::api_resource();
        self.lookup(&resource.group, &resource.kind)
            .ok_or_else(|| RegistryError::not_registered(resource.group, resource.kind))
    }

    /// Find a kind by group and kind name.
    pub fn lookup(&self, group: &str, kind: &str) -> Option<&RegisteredKind> {
        self.entries
            .iter()
            .map(|(registered, _)| registered)
            .find(|registered| registered.group == group && registered.kind == kind)
    }

    /// Registered kinds in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = &RegisteredKind> {
        self.entries.iter().map(|(registered, _)| registered)
    }

    /// CRD manifests in registration order.
    pub fn crds(&self) -> impl Iterator<Item = &CustomResourceDefinition> {
        self.entries.iter().map(|(_, crd)| crd)
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
