//! Core types for the reconciler.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use cmsync_api::ObjectKey;
use serde::{Deserialize, Serialize};

/// Key/value payload of a ConfigMap.
///
/// A `BTreeMap` so equality and iteration do not depend on insertion order.
pub type ResourceData = BTreeMap<String, String>;

/// Write issued against the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOperation {
    Create,
    Update,
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// What a pass did to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncAction {
    /// Destination did not exist and was created.
    Created,
    /// Destination existed with different data and was overwritten.
    Updated,
    /// Destination already matched the source; nothing was written.
    Unchanged,
}

impl SyncAction {
    /// Whether the destination was written.
    pub const fn wrote(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Successful result of one reconciliation pass.
///
/// Errors are the third state and travel as `Err` next to this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The declaration no longer exists. Nothing to do.
    DeclarationGone { declaration: ObjectKey },
    /// The destination holds the source's data.
    Converged {
        declaration: ObjectKey,
        source: ObjectKey,
        destination: ObjectKey,
        action: SyncAction,
        /// Whether this pass wrote the status subresource.
        status_recorded: bool,
    },
}

impl ReconcileOutcome {
    /// How the event source should schedule the next pass for this identity.
    pub const fn requeue(&self) -> RequeueDecision {
        match self {
            Self::DeclarationGone { .. } => RequeueDecision::AwaitChange,
            Self::Converged { .. } => RequeueDecision::Resync,
        }
    }

    /// The destination action, if the pass converged.
    pub const fn action(&self) -> Option<SyncAction> {
        match self {
            Self::DeclarationGone { .. } => None,
            Self::Converged { action, .. } => Some(*action),
        }
    }

    /// Identity the pass ran for.
    pub const fn declaration(&self) -> &ObjectKey {
        match self {
            Self::DeclarationGone { declaration } | Self::Converged { declaration, .. } => {
                declaration
            }
        }
    }

    /// Get a description of the outcome.
    pub fn description(&self) -> String {
        match self {
            Self::DeclarationGone { declaration } => {
                format!("declaration {declaration} is gone")
            }
            Self::Converged {
                source,
                destination,
                action,
                ..
            } => {
                let verb = match action {
                    SyncAction::Created => "created",
                    SyncAction::Updated => "updated",
                    SyncAction::Unchanged => "already matched",
                };
                format!("{destination} {verb} from {source}")
            }
        }
    }
}

/// When the same identity should be reconciled again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueDecision {
    /// Only when a watched object changes.
    AwaitChange,
    /// After the periodic resync interval.
    Resync,
    /// After a failure, once the backoff delay has passed.
    Backoff(Duration),
}
