//! Shared wiring between the CLI and the deployment core.

use crate::exec::{HelmCli, KubectlReadiness, LedgerCli};
use anyhow::{Context, Result};
use deployment_lock::{LockManager, SledLeaseBackend};
use deployment_ops::{Collaborators, OperationRunner, RunnerConfig};
use deployment_registry::backend::StateBackend;
use deployment_registry::{DeploymentState, SledStateBackend, VersionedSnapshot};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Resolved invocation environment: who is acting on which deployment,
/// and where the databases live.
pub struct Env {
    pub deployment: String,
    pub actor: String,
    pub data_dir: PathBuf,
    pub lock_timeout: Duration,
}

impl Env {
    pub fn from_cli(
        deployment: String,
        actor: Option<String>,
        data_dir: Option<PathBuf>,
        lock_timeout_secs: u64,
    ) -> Result<Self> {
        let actor = match actor {
            Some(actor) => actor,
            None => std::env::var("USER").unwrap_or_else(|_| "operator".to_string()),
        };
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("netdeploy"),
        };
        Ok(Self {
            deployment,
            actor,
            data_dir,
            lock_timeout: Duration::from_secs(lock_timeout_secs),
        })
    }

    /// Open the snapshot database.
    pub async fn state_backend(&self) -> Result<Arc<SledStateBackend>> {
        let backend = SledStateBackend::new(self.data_dir.join("state.db"))
            .await
            .context("Failed to open state database")?;
        Ok(Arc::new(backend))
    }

    /// Open the lease database.
    pub async fn lease_backend(&self) -> Result<Arc<SledLeaseBackend>> {
        let backend = SledLeaseBackend::new(self.data_dir.join("locks.db"))
            .await
            .context("Failed to open lock database")?;
        Ok(Arc::new(backend))
    }

    /// Lock manager over the lease database.
    pub async fn lock_manager(&self) -> Result<Arc<LockManager>> {
        Ok(Arc::new(LockManager::new(self.lease_backend().await?)))
    }

    /// Build an operation runner wired to the real collaborators.
    pub async fn runner(&self) -> Result<OperationRunner> {
        let config = RunnerConfig {
            lock_timeout: self.lock_timeout,
            ..RunnerConfig::default()
        };
        let collaborators = Collaborators {
            charts: Arc::new(HelmCli::new()),
            readiness: Arc::new(KubectlReadiness::new()),
            ledger: Arc::new(LedgerCli::new()),
        };
        Ok(OperationRunner::new(
            &self.deployment,
            &self.actor,
            config,
            collaborators,
            self.state_backend().await?,
            self.lock_manager().await?,
        ))
    }

    /// Read the current registry snapshot without taking the lock.
    pub async fn read_state(&self) -> Result<Option<(u64, DeploymentState)>> {
        let backend = self.state_backend().await?;
        match backend.read(&self.deployment).await? {
            Some(VersionedSnapshot { version, data }) => {
                let state = DeploymentState::from_snapshot(&data)
                    .context("Stored snapshot failed validation")?;
                Ok(Some((version, state)))
            }
            None => Ok(None),
        }
    }
}
