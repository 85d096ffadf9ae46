//! Error types for the reconciler crate.

use cmsync_api::{ObjectKey, RegistryError, SpecError};
use thiserror::Error;

use crate::types::WriteOperation;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for store and accessor calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure reported by a [`DeclarationStore`](crate::store::DeclarationStore)
/// or [`ResourceAccessor`](crate::store::ResourceAccessor).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{key} not found")]
    NotFound { key: ObjectKey },

    #[error("{key} already exists")]
    AlreadyExists { key: ObjectKey },

    /// The object changed since it was read.
    #[error("conflicting write to {key}: {reason}")]
    Conflict { key: ObjectKey, reason: String },

    #[error("{operation} {key} failed: {reason}")]
    Backend {
        operation: String,
        key: ObjectKey,
        reason: String,
    },
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(key: &ObjectKey) -> Self {
        Self::NotFound { key: key.clone() }
    }

    /// Create an already exists error.
    pub fn already_exists(key: &ObjectKey) -> Self {
        Self::AlreadyExists { key: key.clone() }
    }

    /// Create a conflict error.
    pub fn conflict(key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Create a backend error.
    pub fn backend(operation: impl Into<String>, key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Whether a retry of the same write against fresh state could succeed.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Reconciler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// The declaration could not be read. Absence is not an error.
    #[error("failed to read declaration {key}: {source}")]
    DeclarationUnavailable { key: ObjectKey, source: StoreError },

    #[error("invalid declaration {key}: {source}")]
    InvalidDeclaration { key: ObjectKey, source: SpecError },

    /// The source ConfigMap is missing or could not be read.
    #[error("source {key} unavailable: {reason}")]
    SourceUnavailable { key: ObjectKey, reason: String },

    #[error("failed to read destination {key}: {source}")]
    DestinationUnavailable { key: ObjectKey, source: StoreError },

    #[error("failed to {operation} destination {key}: {source}")]
    DestinationWrite {
        key: ObjectKey,
        operation: WriteOperation,
        source: StoreError,
    },

    #[error("failed to record status for {key} after {attempts} attempt(s): {source}")]
    StatusWrite {
        key: ObjectKey,
        attempts: u32,
        source: StoreError,
    },

    #[error("object {name} has no namespace")]
    Unaddressable { name: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl Error {
    /// Create a source unavailable error.
    pub fn source_unavailable(key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Create a destination write error.
    pub fn destination_write(key: &ObjectKey, operation: WriteOperation, source: StoreError) -> Self {
        Self::DestinationWrite {
            key: key.clone(),
            operation,
            source,
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Short machine-readable reason, used as a log field.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::DeclarationUnavailable { .. } => "declaration_unavailable",
            Self::InvalidDeclaration { .. } => "invalid_declaration",
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::DestinationUnavailable { .. } => "destination_unavailable",
            Self::DestinationWrite { .. } => "destination_write_failed",
            Self::StatusWrite { .. } => "status_write_failed",
            Self::Unaddressable { .. } => "unaddressable",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::Registry(_) => "registry",
            Self::Kube(_) => "kube",
        }
    }
}
