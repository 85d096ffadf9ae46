//! Declaration types for the ConfigMap sync controller.
//!
//! A [`ConfigMapSync`] names a ConfigMap in a source namespace and a
//! destination namespace it should be copied into. This crate owns:
//!
//! - **Schema**: the `ConfigMapSync` custom resource, its spec and status
//! - **Identity**: [`ObjectKey`], the namespace/name pair used to address objects
//! - **Registry**: [`TypeRegistry`], the explicit set of kinds the process serves
//!
//! # Example
//!
//! ```ignore
//! use cmsync_api::{ConfigMapSync, TypeRegistry};
//!
//! let registry = TypeRegistry::with_defaults()?;
//! assert!(registry.contains::<ConfigMapSync>());
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod crd;
pub mod error;
pub mod key;
pub mod registry;

// Re-export main types
pub use crd::{
    ConfigMapSync, ConfigMapSyncSpec, ConfigMapSyncStatus, API_GROUP, API_VERSION,
    DECLARATION_ANNOTATION, MANAGED_BY_LABEL, MANAGER_NAME,
};
pub use error::{RegistryError, Result, SpecError};
pub use key::ObjectKey;
pub use registry::{RegisteredKind, TypeRegistry};
