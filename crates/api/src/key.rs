//! Namespaced object identity.

use std::fmt;

use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};

/// Namespace and name of an object.
///
/// Declarations, sources and destinations are all addressed by this pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Create a new key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced object, `None` for cluster-scoped objects.
    pub fn of<K: Resource>(obj: &K) -> Option<Self> {
        obj.namespace().map(|ns| Self::new(ns, obj.name_any()))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
