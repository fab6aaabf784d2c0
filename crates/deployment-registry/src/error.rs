//! Error types for the deployment registry

use crate::models::ComponentKind;
use crate::phase::ComponentPhase;
use thiserror::Error;

/// Deployment registry error type
#[derive(Error, Debug)]
pub enum Error {
    /// A record or the aggregate failed validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// A component with the same structural identity already exists
    #[error("duplicate {kind} component in cluster '{cluster_ref}', namespace '{namespace}'")]
    DuplicateComponent {
        /// Component kind
        kind: ComponentKind,
        /// Cluster reference of the conflicting record
        cluster_ref: String,
        /// Namespace of the conflicting record
        namespace: String,
    },

    /// No component with the given id exists for the kind
    #[error("{kind} component with id {id} not found")]
    NotFound {
        /// Component kind
        kind: ComponentKind,
        /// Component id that was looked up
        id: u32,
    },

    /// The requested phase is not reachable from the current phase
    #[error("invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current phase
        from: ComponentPhase,
        /// Attempted phase
        to: ComponentPhase,
    },

    /// A persisted snapshot failed validation on load
    #[error("corrupt deployment snapshot")]
    CorruptState(#[source] Box<Error>),

    /// Optimistic-concurrency token mismatch on snapshot write
    #[error("snapshot write conflict: expected version {expected}, found {actual}")]
    Conflict {
        /// Version the writer expected to replace
        expected: u64,
        /// Version actually stored
        actual: u64,
    },

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Storage backend error
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
