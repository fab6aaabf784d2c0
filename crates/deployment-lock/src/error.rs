//! Error types for the lease manager

use std::time::Duration;
use thiserror::Error;

/// Lease manager error type
#[derive(Error, Debug)]
pub enum Error {
    /// No lease could be obtained within the acquire timeout
    #[error(
        "could not acquire lock on deployment '{deployment}' within {waited:?}; \
         another operation holds it (retry later, or break it with a force operation)"
    )]
    LockTimeout {
        /// Deployment whose lock was contended
        deployment: String,
        /// How long acquisition was attempted
        waited: Duration,
    },

    /// The lease was taken over by another holder while we held it
    #[error("lock on deployment '{deployment}' was lost to another holder")]
    LockLost {
        /// Deployment whose lock was lost
        deployment: String,
    },

    /// Storage backend error
    #[error("lease storage error: {0}")]
    Sled(#[from] sled::Error),

    /// Lease (de)serialization error
    #[error("lease serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
