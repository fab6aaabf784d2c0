//! Lease storage backends

pub mod sled;

use crate::error::Result;
use crate::lease::Lease;
use async_trait::async_trait;

pub use self::sled::SledLeaseBackend;

/// Trait for lease storage backends.
///
/// Every mutating operation is conditional on the currently stored value,
/// so two processes racing on the same deployment cannot both observe
/// success. An implementation built on a weaker read-then-write primitive
/// would break the mutual-exclusion guarantee of [`crate::LockManager`].
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Read the stored lease for a deployment, if any.
    async fn get(&self, deployment: &str) -> Result<Option<Lease>>;

    /// Atomically store the lease if no lease exists for its deployment.
    ///
    /// Returns `false` when a lease (live or expired) is already stored.
    async fn try_create(&self, lease: &Lease) -> Result<bool>;

    /// Atomically replace `old` with `new` for the same deployment.
    ///
    /// Returns `false` when the stored lease is no longer `old`.
    async fn swap(&self, old: &Lease, new: &Lease) -> Result<bool>;

    /// Remove the lease only if it is still held by `holder`.
    ///
    /// Returns `false` when the lease is absent or foreign.
    async fn remove_if_held(&self, deployment: &str, holder: &str) -> Result<bool>;

    /// Remove any lease for the deployment, regardless of holder.
    async fn remove(&self, deployment: &str) -> Result<()>;
}
