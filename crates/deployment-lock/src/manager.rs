//! Lease acquisition, renewal and release

use crate::backend::LeaseBackend;
use crate::error::{Error, Result};
use crate::lease::Lease;
use async_io::Timer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Manages the deployment lease lifecycle against a pluggable backend.
pub struct LockManager {
    backend: Arc<dyn LeaseBackend>,
    ttl: Duration,
}

impl LockManager {
    /// Default lease time-to-live.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

    /// Create a manager with the default TTL.
    pub fn new(backend: Arc<dyn LeaseBackend>) -> Self {
        Self::with_ttl(backend, Self::DEFAULT_TTL)
    }

    /// Create a manager with a custom lease TTL.
    pub fn with_ttl(backend: Arc<dyn LeaseBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// The TTL applied to created and renewed leases.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Acquire the lease for a deployment.
    ///
    /// Polls every `poll_interval` until `timeout` has elapsed. An expired
    /// lease left behind by a crashed holder is taken over atomically; a
    /// live foreign lease is never overwritten. Fails with
    /// [`Error::LockTimeout`] when the deadline passes without success.
    pub async fn acquire(
        &self,
        deployment: &str,
        holder: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Lease> {
        let started = Instant::now();

        loop {
            match self.backend.get(deployment).await? {
                None => {
                    let candidate = Lease::new(deployment, holder, self.ttl);
                    if self.backend.try_create(&candidate).await? {
                        info!(
                            "Acquired lock on deployment '{}' (holder '{}')",
                            deployment, holder
                        );
                        return Ok(candidate);
                    }
                    // Lost the create race; re-read and keep polling
                    debug!("Lost create race for deployment '{}'", deployment);
                }
                Some(stored) if stored.is_expired() => {
                    let candidate = Lease::new(deployment, holder, self.ttl);
                    if self.backend.swap(&stored, &candidate).await? {
                        warn!(
                            "Took over expired lock on deployment '{}' \
                             (previous holder '{}')",
                            deployment, stored.holder
                        );
                        return Ok(candidate);
                    }
                    debug!("Lost takeover race for deployment '{}'", deployment);
                }
                Some(stored) => {
                    debug!(
                        "Deployment '{}' locked by '{}' until {}",
                        deployment, stored.holder, stored.expires_at
                    );
                }
            }

            if started.elapsed() >= timeout {
                return Err(Error::LockTimeout {
                    deployment: deployment.to_string(),
                    waited: started.elapsed(),
                });
            }
            Timer::after(poll_interval).await;
        }
    }

    /// Extend a held lease so it does not expire mid-operation.
    ///
    /// Fails with [`Error::LockLost`] when the stored lease is absent or
    /// held by someone else.
    pub async fn renew(&self, lease: &Lease) -> Result<Lease> {
        loop {
            let stored = self
                .backend
                .get(&lease.deployment)
                .await?
                .ok_or_else(|| Error::LockLost {
                    deployment: lease.deployment.clone(),
                })?;

            if stored.holder != lease.holder {
                return Err(Error::LockLost {
                    deployment: lease.deployment.clone(),
                });
            }

            let renewed = stored.renewed(self.ttl);
            if self.backend.swap(&stored, &renewed).await? {
                debug!(
                    "Renewed lock on deployment '{}' until {}",
                    lease.deployment, renewed.expires_at
                );
                return Ok(renewed);
            }
            // CAS raced with another renewal of our own lease; retry from
            // the freshly stored value
        }
    }

    /// Best-effort release.
    ///
    /// Deletes the lease only while still held by its holder; an expired or
    /// foreign lease is left alone. Failures are logged and swallowed
    /// because release runs in cleanup paths and must never mask the
    /// operation's real error.
    pub async fn release(&self, lease: &Lease) {
        match self
            .backend
            .remove_if_held(&lease.deployment, &lease.holder)
            .await
        {
            Ok(true) => info!("Released lock on deployment '{}'", lease.deployment),
            Ok(false) => debug!(
                "Lock on deployment '{}' already gone or foreign at release",
                lease.deployment
            ),
            Err(e) => warn!(
                "Failed to release lock on deployment '{}': {}",
                lease.deployment, e
            ),
        }
    }

    /// Administrative override: delete any lease regardless of holder.
    pub async fn force_break(&self, deployment: &str) -> Result<()> {
        warn!("Force-breaking lock on deployment '{}'", deployment);
        self.backend.remove(deployment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SledLeaseBackend;

    async fn manager(ttl: Duration) -> LockManager {
        let backend = Arc::new(SledLeaseBackend::in_memory().await.unwrap());
        LockManager::with_ttl(backend, ttl)
    }

    #[smol_potat::test]
    async fn test_acquire_and_release() {
        let manager = manager(Duration::from_secs(60)).await;

        let lease = manager
            .acquire(
                "dev",
                "holder-a",
                Duration::from_millis(100),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert_eq!(lease.holder, "holder-a");

        manager.release(&lease).await;

        // Free again for another holder
        let lease = manager
            .acquire(
                "dev",
                "holder-b",
                Duration::from_millis(100),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert_eq!(lease.holder, "holder-b");
    }

    #[smol_potat::test]
    async fn test_acquire_times_out_against_live_lease() {
        let manager = manager(Duration::from_secs(60)).await;
        let _held = manager
            .acquire(
                "dev",
                "holder-a",
                Duration::from_millis(50),
                Duration::from_millis(10),
            )
            .await
            .unwrap();

        // The lease lives for 60s; a 200ms acquire must fail after roughly
        // its own timeout, neither immediately nor at lease expiry
        let started = Instant::now();
        let err = manager
            .acquire(
                "dev",
                "holder-b",
                Duration::from_millis(200),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        let waited = started.elapsed();

        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(waited >= Duration::from_millis(200));
        assert!(waited < Duration::from_secs(5));
    }

    #[smol_potat::test]
    async fn test_concurrent_acquire_is_exclusive() {
        let backend = Arc::new(SledLeaseBackend::in_memory().await.unwrap());
        let manager = Arc::new(LockManager::with_ttl(backend, Duration::from_secs(60)));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                smol::spawn(async move {
                    manager
                        .acquire(
                            "dev",
                            &format!("holder-{i}"),
                            Duration::from_millis(80),
                            Duration::from_millis(10),
                        )
                        .await
                })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[smol_potat::test]
    async fn test_expired_lease_taken_over() {
        let manager = manager(Duration::from_millis(20)).await;
        let stale = manager
            .acquire(
                "dev",
                "holder-a",
                Duration::from_millis(50),
                Duration::from_millis(10),
            )
            .await
            .unwrap();

        Timer::after(Duration::from_millis(40)).await;
        assert!(stale.is_expired());

        let lease = manager
            .acquire(
                "dev",
                "holder-b",
                Duration::from_millis(100),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert_eq!(lease.holder, "holder-b");
    }

    #[smol_potat::test]
    async fn test_renew_extends_and_detects_loss() {
        let manager = manager(Duration::from_secs(60)).await;
        let lease = manager
            .acquire(
                "dev",
                "holder-a",
                Duration::from_millis(50),
                Duration::from_millis(10),
            )
            .await
            .unwrap();

        let renewed = manager.renew(&lease).await.unwrap();
        assert!(renewed.expires_at >= lease.expires_at);

        // Someone force-breaks and takes the lock; renewal must fail
        manager.force_break("dev").await.unwrap();
        let _other = manager
            .acquire(
                "dev",
                "holder-b",
                Duration::from_millis(50),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        let err = manager.renew(&renewed).await.unwrap_err();
        assert!(matches!(err, Error::LockLost { .. }));
    }

    #[smol_potat::test]
    async fn test_release_of_foreign_lease_is_noop() {
        let manager = manager(Duration::from_secs(60)).await;
        let lease = manager
            .acquire(
                "dev",
                "holder-a",
                Duration::from_millis(50),
                Duration::from_millis(10),
            )
            .await
            .unwrap();

        // A stale handle from a previous run must not free the live lock
        let foreign = Lease::new("dev", "holder-old", Duration::from_secs(60));
        manager.release(&foreign).await;
        assert!(manager.renew(&lease).await.is_ok());
    }
}
