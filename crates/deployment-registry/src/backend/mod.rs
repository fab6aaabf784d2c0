//! Snapshot persistence backends

pub mod sled;

use crate::error::Result;
use async_trait::async_trait;

pub use self::sled::SledStateBackend;

/// A snapshot document together with its optimistic-concurrency token.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedSnapshot {
    /// Monotonic version, bumped on every successful write
    pub version: u64,
    /// Serialized [`crate::DeploymentState`] document
    pub data: Vec<u8>,
}

/// Trait for snapshot storage backends.
///
/// Writes carry the version the writer expects to replace; a mismatch
/// fails with [`crate::Error::Conflict`] so lost updates are detected even
/// if the deployment lock failed to exclude a concurrent writer.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read the current snapshot for a deployment, if any.
    async fn read(&self, deployment: &str) -> Result<Option<VersionedSnapshot>>;

    /// Conditionally write a snapshot.
    ///
    /// `expected` is `None` for an initial create (fails if a snapshot
    /// already exists) or `Some(version)` to replace exactly that version.
    /// Returns the new version on success.
    async fn write(&self, deployment: &str, data: &[u8], expected: Option<u64>) -> Result<u64>;

    /// Delete a deployment's snapshot. Deleting a missing snapshot is a
    /// no-op.
    async fn delete(&self, deployment: &str) -> Result<()>;
}
