//! Sled-backed lease storage

use super::LeaseBackend;
use crate::error::Result;
use crate::lease::Lease;
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, error};

/// Sled-based lease backend.
///
/// All conditional operations go through `compare_and_swap` on the
/// serialized lease bytes, so create-if-absent and holder checks are
/// atomic at the storage layer.
pub struct SledLeaseBackend {
    db: sled::Db,
    leases: sled::Tree,
}

impl SledLeaseBackend {
    /// Open (or create) a lease database at the given path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!("Failed to create lease database directory: {}", e);
            }
        }

        let db = sled::open(path)?;
        let leases = db.open_tree("leases")?;
        Ok(Self { db, leases })
    }

    /// Create an in-memory backend (for testing).
    pub async fn in_memory() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let leases = db.open_tree("leases")?;
        Ok(Self { db, leases })
    }
}

#[async_trait]
impl LeaseBackend for SledLeaseBackend {
    async fn get(&self, deployment: &str) -> Result<Option<Lease>> {
        match self.leases.get(deployment.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn try_create(&self, lease: &Lease) -> Result<bool> {
        let value = serde_json::to_vec(lease)?;
        let outcome = self.leases.compare_and_swap(
            lease.deployment.as_bytes(),
            None::<&[u8]>,
            Some(value),
        )?;

        if outcome.is_ok() {
            debug!(
                "Created lease for deployment '{}' held by '{}'",
                lease.deployment, lease.holder
            );
            self.leases.flush_async().await?;
        }
        Ok(outcome.is_ok())
    }

    async fn swap(&self, old: &Lease, new: &Lease) -> Result<bool> {
        let old_value = serde_json::to_vec(old)?;
        let new_value = serde_json::to_vec(new)?;
        let outcome = self.leases.compare_and_swap(
            old.deployment.as_bytes(),
            Some(old_value),
            Some(new_value),
        )?;

        if outcome.is_ok() {
            self.leases.flush_async().await?;
        }
        Ok(outcome.is_ok())
    }

    async fn remove_if_held(&self, deployment: &str, holder: &str) -> Result<bool> {
        let Some(raw) = self.leases.get(deployment.as_bytes())? else {
            return Ok(false);
        };
        let stored: Lease = serde_json::from_slice(&raw)?;
        if stored.holder != holder {
            return Ok(false);
        }

        let outcome =
            self.leases
                .compare_and_swap(deployment.as_bytes(), Some(raw), None::<&[u8]>)?;
        if outcome.is_ok() {
            debug!("Removed lease for deployment '{}'", deployment);
            self.leases.flush_async().await?;
        }
        Ok(outcome.is_ok())
    }

    async fn remove(&self, deployment: &str) -> Result<()> {
        self.leases.remove(deployment.as_bytes())?;
        self.leases.flush_async().await?;
        Ok(())
    }
}

impl Drop for SledLeaseBackend {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            error!("Failed to flush lease database on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[smol_potat::test]
    async fn test_create_is_exclusive() {
        let backend = SledLeaseBackend::in_memory().await.unwrap();
        let first = Lease::new("dev", "holder-a", Duration::from_secs(60));
        let second = Lease::new("dev", "holder-b", Duration::from_secs(60));

        assert!(backend.try_create(&first).await.unwrap());
        assert!(!backend.try_create(&second).await.unwrap());

        let stored = backend.get("dev").await.unwrap().unwrap();
        assert_eq!(stored.holder, "holder-a");
    }

    #[smol_potat::test]
    async fn test_swap_requires_exact_match() {
        let backend = SledLeaseBackend::in_memory().await.unwrap();
        let lease = Lease::new("dev", "holder-a", Duration::from_secs(60));
        backend.try_create(&lease).await.unwrap();

        let renewed = lease.renewed(Duration::from_secs(60));
        assert!(backend.swap(&lease, &renewed).await.unwrap());

        // The original lease bytes are gone; swapping from them again fails
        assert!(!backend.swap(&lease, &renewed).await.unwrap());
    }

    #[smol_potat::test]
    async fn test_remove_if_held_checks_holder() {
        let backend = SledLeaseBackend::in_memory().await.unwrap();
        let lease = Lease::new("dev", "holder-a", Duration::from_secs(60));
        backend.try_create(&lease).await.unwrap();

        assert!(!backend.remove_if_held("dev", "holder-b").await.unwrap());
        assert!(backend.get("dev").await.unwrap().is_some());

        assert!(backend.remove_if_held("dev", "holder-a").await.unwrap());
        assert!(backend.get("dev").await.unwrap().is_none());
        assert!(!backend.remove_if_held("dev", "holder-a").await.unwrap());
    }
}
