//! Error types for the api crate.

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Type registry errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The same group/kind was registered earlier with a different definition.
    #[error("kind '{kind}' in group '{group}' is already registered as {existing}")]
    Conflicting {
        group: String,
        kind: String,
        existing: String,
    },

    /// A kind the caller depends on was never registered.
    #[error("kind '{kind}' in group '{group}' is not registered")]
    NotRegistered { group: String, kind: String },
}

impl RegistryError {
    /// Create a conflicting registration error.
    pub fn conflicting(
        group: impl Into<String>,
        kind: impl Into<String>,
        existing: impl Into<String>,
    ) -> Self {
        Self::Conflicting {
            group: group.into(),
            kind: kind.into(),
            existing: existing.into(),
        }
    }

    /// Create a not registered error.
    pub fn not_registered(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::NotRegistered {
            group: group.into(),
            kind: kind.into(),
        }
    }
}

/// A declaration spec that cannot be acted on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("spec.{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("destination namespace '{namespace}' is the source namespace")]
    SameNamespace { namespace: String },
}
