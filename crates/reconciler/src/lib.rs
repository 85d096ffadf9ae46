//! Level-triggered reconciliation of `ConfigMapSync` declarations.
//!
//! A `ConfigMapSync` names a source ConfigMap, a destination namespace and a
//! ConfigMap name. Each pass re-reads the declaration, the source and the
//! destination, then makes the destination hold exactly the source's data:
//!
//! - **Absent destination**: created with the source's data
//! - **Different destination**: its data replaced wholesale
//! - **Equal destination**: left untouched, no write issued
//! - **Deleted declaration**: nothing to do, not an error
//!
//! Passes hold no state between invocations, so they are safe to repeat,
//! reorder, and run for many declarations at once.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cmsync_api::ObjectKey;
//! use cmsync_reconciler::{
//!     InMemoryDeclarationStore, InMemoryResourceStore, ReconcilerBuilder,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let declarations = Arc::new(InMemoryDeclarationStore::new());
//!     let resources = Arc::new(InMemoryResourceStore::new());
//!     let reconciler = ReconcilerBuilder::new()
//!         .with_declarations(declarations)
//!         .with_resources(resources)
//!         .build()
//!         .unwrap();
//!
//!     let outcome = reconciler.reconcile(&ObjectKey::new("ops", "mirror")).await;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod backoff;
pub mod config;
pub mod controller;
pub mod error;
pub mod kube_store;
pub mod reconciler;
pub mod status;
pub mod store;
pub mod types;

pub use backoff::{BackoffConfig, RequeueBackoff};
pub use config::{ControllerConfig, ENV_PREFIX};
pub use controller::{Context, declarations_for_config_map, error_policy, reconcile, run};
pub use error::{Error, Result, StoreError, StoreResult};
pub use kube_store::{KubeConfigMapAccessor, KubeDeclarationStore};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use status::StatusWriter;
pub use store::{
    DeclarationStore, InMemoryDeclarationStore, InMemoryResourceStore, ResourceAccessor,
    StoreOperation,
};
pub use types::{ReconcileOutcome, RequeueDecision, ResourceData, SyncAction, WriteOperation};
