//! Lock-acquire, load, run, release plumbing around the pipelines.

use crate::collaborators::{ChartInstaller, LedgerClient, ReadinessChecker};
use crate::context::OpsContext;
use crate::{pipelines, Result};
use deployment_lock::LockManager;
use deployment_registry::backend::StateBackend;
use deployment_registry::{ComponentKind, ComponentRecord, DeploymentState};
use std::sync::Arc;
use std::time::Duration;
use task_runner::{Pipeline, RunReport, Step};
use tracing::{info, warn};

/// Tuning knobs shared by every operation.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long to wait for the deployment lock before giving up
    pub lock_timeout: Duration,
    /// How often to re-check a held lock while waiting
    pub lock_poll_interval: Duration,
    /// Attempts per readiness wait
    pub readiness_attempts: u32,
    /// Delay between readiness attempts
    pub readiness_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(300),
            lock_poll_interval: Duration::from_secs(2),
            readiness_attempts: 60,
            readiness_delay: Duration::from_secs(2),
        }
    }
}

/// The external-world seams every pipeline runs against.
#[derive(Clone)]
pub struct Collaborators {
    /// Installs, upgrades and removes charts
    pub charts: Arc<dyn ChartInstaller>,
    /// Waits for pods to report ready
    pub readiness: Arc<dyn ReadinessChecker>,
    /// Submits ledger transactions
    pub ledger: Arc<dyn LedgerClient>,
}

/// One top-level operation against a deployment.
pub enum Operation {
    /// Record a cluster reference and its connection context
    RegisterCluster {
        /// Cluster reference
        cluster_ref: String,
        /// Connection context for that cluster
        context: String,
    },
    /// Register an auxiliary component without deploying it
    AddComponent(ComponentRecord),
    /// Register, deploy, configure and start one consensus node
    AddConsensusNode(Box<pipelines::ConsensusNodeParams>),
    /// Roll a consensus node's chart to a new version in place
    UpgradeNode {
        /// Registry id of the node
        id: u32,
        /// Chart to upgrade to
        chart: pipelines::ChartSource,
    },
    /// Transition a stopped consensus node back to started
    StartNode {
        /// Registry id of the node
        id: u32,
    },
    /// Transition a started consensus node to stopped
    StopNode {
        /// Registry id of the node
        id: u32,
    },
    /// Coordinated freeze of every consensus node
    FreezeNetwork,
    /// Coordinated thaw of every consensus node
    UnfreezeNetwork,
    /// Tear down one component and its registry record
    DestroyComponent {
        /// Component kind
        kind: ComponentKind,
        /// Registry id
        id: u32,
    },
}

impl Operation {
    fn describe(&self) -> &'static str {
        match self {
            Operation::RegisterCluster { .. } => "register cluster",
            Operation::AddComponent(_) => "add component",
            Operation::AddConsensusNode(_) => "add consensus node",
            Operation::UpgradeNode { .. } => "upgrade node",
            Operation::StartNode { .. } => "start node",
            Operation::StopNode { .. } => "stop node",
            Operation::FreezeNetwork => "freeze network",
            Operation::UnfreezeNetwork => "unfreeze network",
            Operation::DestroyComponent { .. } => "destroy component",
        }
    }

    fn into_step(self) -> Step<OpsContext> {
        match self {
            Operation::RegisterCluster {
                cluster_ref,
                context,
            } => pipelines::register_cluster(cluster_ref, context),
            Operation::AddComponent(record) => pipelines::add_component(record),
            Operation::AddConsensusNode(params) => pipelines::add_consensus_node(*params),
            Operation::UpgradeNode { id, chart } => pipelines::upgrade_node(id, chart),
            Operation::StartNode { id } => pipelines::start_node(id),
            Operation::StopNode { id } => pipelines::stop_node(id),
            Operation::FreezeNetwork => pipelines::freeze_network(),
            Operation::UnfreezeNetwork => pipelines::unfreeze_network(),
            Operation::DestroyComponent { kind, id } => pipelines::destroy_component(kind, id),
        }
    }
}

/// Runs operations against one deployment, serialized by the
/// deployment lock.
pub struct OperationRunner {
    deployment: String,
    actor: String,
    config: RunnerConfig,
    collaborators: Collaborators,
    backend: Arc<dyn StateBackend>,
    locks: Arc<LockManager>,
}

impl OperationRunner {
    /// Build a runner for one deployment.
    pub fn new(
        deployment: impl Into<String>,
        actor: impl Into<String>,
        config: RunnerConfig,
        collaborators: Collaborators,
        backend: Arc<dyn StateBackend>,
        locks: Arc<LockManager>,
    ) -> Self {
        Self {
            deployment: deployment.into(),
            actor: actor.into(),
            config,
            collaborators,
            backend,
            locks,
        }
    }

    /// Run one operation under the deployment lock.
    ///
    /// The lock is always released on the way out, whether the pipeline
    /// succeeded or not. A partially-run pipeline leaves its last
    /// checkpoint committed, so re-running the same operation resumes
    /// from where it stopped.
    pub async fn run(&self, operation: Operation) -> Result<RunReport> {
        // Unique holder per run so two runners sharing an actor name
        // cannot mistake each other's lease for their own
        let holder = format!("{}-{}", self.actor, uuid::Uuid::new_v4());
        let lease = self
            .locks
            .acquire(
                &self.deployment,
                &holder,
                self.config.lock_timeout,
                self.config.lock_poll_interval,
            )
            .await?;

        let description = operation.describe();
        info!(
            "Running '{}' on deployment '{}'",
            description, self.deployment
        );

        let result = self.run_locked(operation, lease.clone()).await;

        match &result {
            Ok(report) => info!(
                "'{}' on deployment '{}' done ({} step(s) run, {} skipped)",
                description, self.deployment, report.executed, report.skipped
            ),
            Err(err) => warn!(
                "'{}' on deployment '{}' failed: {}",
                description, self.deployment, err
            ),
        }

        // Release matches on holder, so it covers whatever lease
        // incarnation the checkpoints renewed to.
        self.locks.release(&lease).await;
        result
    }

    async fn run_locked(
        &self,
        operation: Operation,
        lease: deployment_lock::Lease,
    ) -> Result<RunReport> {
        let (state, version) = match self.backend.read(&self.deployment).await? {
            Some(snapshot) => (
                DeploymentState::from_snapshot(&snapshot.data)?,
                Some(snapshot.version),
            ),
            None => (DeploymentState::new(&self.actor), None),
        };

        let ctx = Arc::new(OpsContext::new(
            self.deployment.clone(),
            self.actor.clone(),
            self.config.clone(),
            state,
            version,
            self.backend.clone(),
            self.locks.clone(),
            lease,
            self.collaborators.charts.clone(),
            self.collaborators.readiness.clone(),
            self.collaborators.ledger.clone(),
        ));

        Ok(Pipeline::run(operation.into_step(), ctx).await?)
    }
}
