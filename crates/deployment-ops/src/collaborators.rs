//! External collaborator seams.
//!
//! The deployment core treats chart installation, pod readiness and
//! ledger transactions as opaque calls behind these traits. Production
//! implementations shell out to Helm / talk to cluster APIs; the bundled
//! [`crate::mock`] implementations back the test suite.

use async_trait::async_trait;
use std::time::Duration;

/// Identifies one chart release on one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRelease {
    /// Target namespace
    pub namespace: String,
    /// Release name
    pub release: String,
    /// Chart reference (repo/chart)
    pub chart: String,
    /// Chart version
    pub version: String,
    /// Extra value arguments passed through to the installer
    pub values: Vec<String>,
    /// Connection context of the target cluster
    pub cluster_context: String,
}

impl ChartRelease {
    /// Stable key identifying this release across calls.
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.cluster_context, self.namespace, self.release
        )
    }
}

/// Installs, upgrades and removes chart releases.
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    /// Whether the release is already present on the cluster.
    ///
    /// Pipelines consult this before installing so a re-run after a crash
    /// between the install and its checkpoint does not install twice.
    async fn is_installed(&self, release: &ChartRelease) -> anyhow::Result<bool>;

    /// Install the release.
    async fn install(&self, release: &ChartRelease) -> anyhow::Result<()>;

    /// Upgrade an existing release in place.
    async fn upgrade(&self, release: &ChartRelease) -> anyhow::Result<()>;

    /// Uninstall the release. Uninstalling an absent release is a no-op.
    async fn uninstall(&self, release: &ChartRelease) -> anyhow::Result<()>;
}

/// A pod matched by a readiness check.
#[derive(Debug, Clone, PartialEq)]
pub struct PodRef {
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
}

/// Polls the target cluster until pods are ready.
#[async_trait]
pub trait ReadinessChecker: Send + Sync {
    /// Wait until every pod matching the selectors reports ready.
    ///
    /// Implementations must bound their wait to
    /// `max_attempts x delay` and return an error on exhaustion; the
    /// pipeline never retries around this call.
    async fn wait_for_pods_ready(
        &self,
        cluster_context: &str,
        namespace: &str,
        label_selectors: &[String],
        max_attempts: u32,
        delay: Duration,
    ) -> anyhow::Result<Vec<PodRef>>;
}

/// Receipt of a ledger transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct FreezeReceipt {
    /// Receipt status reported by the ledger
    pub status: String,
}

/// Submits ledger transactions used by specific pipeline steps.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit the network-wide freeze transaction.
    async fn submit_freeze(&self, deployment: &str) -> anyhow::Result<FreezeReceipt>;
}
