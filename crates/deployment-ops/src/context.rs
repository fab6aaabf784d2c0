//! The run context threaded through every pipeline step.

use crate::collaborators::{ChartInstaller, LedgerClient, ReadinessChecker};
use crate::runner::RunnerConfig;
use crate::{Error, Result};
use deployment_lock::{Lease, LockManager};
use deployment_registry::{ComponentKind, ComponentPhase, DeploymentState, StateBackend};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Everything one operation run needs, owned by that run.
///
/// There is no process-wide "current lease" or "current state": each
/// invocation builds its own context, so concurrent invocations in the
/// same process (tests in particular) cannot interfere. Concurrent
/// pipeline steps only read; writes are confined to sequential steps, so
/// the interior locks are never contended across a phase transition.
pub struct OpsContext {
    /// The logical deployment being operated on
    pub deployment: String,
    /// Identity stamped into registry metadata
    pub actor: String,
    /// Runner tuning (readiness attempts, delays)
    pub config: RunnerConfig,
    /// Chart installer collaborator
    pub charts: Arc<dyn ChartInstaller>,
    /// Readiness checker collaborator
    pub readiness: Arc<dyn ReadinessChecker>,
    /// Ledger client collaborator
    pub ledger: Arc<dyn LedgerClient>,

    state: RwLock<DeploymentState>,
    backend: Arc<dyn StateBackend>,
    version: Mutex<Option<u64>>,
    locks: Arc<LockManager>,
    lease: Mutex<Option<Lease>>,
}

impl OpsContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        deployment: String,
        actor: String,
        config: RunnerConfig,
        state: DeploymentState,
        version: Option<u64>,
        backend: Arc<dyn StateBackend>,
        locks: Arc<LockManager>,
        lease: Lease,
        charts: Arc<dyn ChartInstaller>,
        readiness: Arc<dyn ReadinessChecker>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Self {
        Self {
            deployment,
            actor,
            config,
            charts,
            readiness,
            ledger,
            state: RwLock::new(state),
            backend,
            version: Mutex::new(version),
            locks,
            lease: Mutex::new(Some(lease)),
        }
    }

    /// Read from the in-memory registry state.
    pub fn read_state<R>(&self, f: impl FnOnce(&DeploymentState) -> R) -> R {
        f(&self.state.read().expect("state lock poisoned"))
    }

    /// Mutate the in-memory registry state.
    ///
    /// The mutation is not durable until the next [`OpsContext::checkpoint`].
    pub fn update_state<R>(
        &self,
        f: impl FnOnce(&mut DeploymentState) -> deployment_registry::Result<R>,
    ) -> Result<R> {
        let mut state = self.state.write().expect("state lock poisoned");
        Ok(f(&mut state)?)
    }

    /// Persist the current registry state and renew the lease.
    ///
    /// Runs after every mutating step, not just at the end of a pipeline,
    /// so a crash leaves the last committed snapshot rather than losing
    /// the whole run. The write carries the version we loaded, so a lost
    /// update surfaces as a conflict even if the lock failed us.
    pub async fn checkpoint(&self) -> Result<()> {
        let bytes = self
            .state
            .read()
            .expect("state lock poisoned")
            .to_snapshot()?;
        let expected = *self.version.lock().expect("version lock poisoned");

        let new_version = self
            .backend
            .write(&self.deployment, &bytes, expected)
            .await?;
        *self.version.lock().expect("version lock poisoned") = Some(new_version);
        debug!(
            "Checkpointed deployment '{}' at version {}",
            self.deployment, new_version
        );

        let held = self.lease.lock().expect("lease lock poisoned").clone();
        if let Some(lease) = held {
            let renewed = self.locks.renew(&lease).await?;
            *self.lease.lock().expect("lease lock poisoned") = Some(renewed);
        }

        Ok(())
    }

    /// Phase of the component matching a structural identity, if present.
    pub fn phase_of(
        &self,
        kind: ComponentKind,
        cluster_ref: &str,
        namespace: &str,
    ) -> Option<ComponentPhase> {
        self.read_state(|state| {
            state
                .list_components(kind)
                .into_iter()
                .find(|r| r.cluster_ref == cluster_ref && r.namespace == namespace)
                .map(|r| r.phase)
        })
    }

    /// Id of the component matching a structural identity, if present.
    pub fn id_of(&self, kind: ComponentKind, cluster_ref: &str, namespace: &str) -> Option<u32> {
        self.read_state(|state| {
            state
                .list_components(kind)
                .into_iter()
                .find(|r| r.cluster_ref == cluster_ref && r.namespace == namespace)
                .map(|r| r.id)
        })
    }

    /// Connection context registered for a cluster reference.
    pub fn cluster_context(&self, cluster_ref: &str) -> Result<String> {
        self.read_state(|state| state.clusters.get(cluster_ref).cloned())
            .ok_or_else(|| {
                Error::Registry(deployment_registry::Error::Validation(format!(
                    "unknown cluster reference '{cluster_ref}'"
                )))
            })
    }
}
