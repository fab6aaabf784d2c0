//! Collaborator implementations that shell out to cluster tooling.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use deployment_ops::{ChartInstaller, ChartRelease, FreezeReceipt, LedgerClient, PodRef,
    ReadinessChecker};
use smol::process::Command;
use std::time::Duration;
use task_runner::retry;
use tracing::{debug, info};

async fn run_command(mut cmd: Command, what: &str) -> Result<String> {
    debug!("Running {:?}", cmd);
    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to spawn {what}"))?;
    if !output.status.success() {
        bail!(
            "{} failed ({}): {}",
            what,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// [`ChartInstaller`] backed by the `helm` binary.
pub struct HelmCli;

impl HelmCli {
    pub fn new() -> Self {
        Self
    }

    fn base(&self, release: &ChartRelease, subcommand: &str) -> Command {
        let mut cmd = Command::new("helm");
        cmd.arg(subcommand)
            .arg("--namespace")
            .arg(&release.namespace)
            .arg("--kube-context")
            .arg(&release.cluster_context);
        cmd
    }
}

#[async_trait]
impl ChartInstaller for HelmCli {
    async fn is_installed(&self, release: &ChartRelease) -> Result<bool> {
        let mut cmd = self.base(release, "status");
        cmd.arg(&release.release);
        // A missing release is the expected failure mode here
        let output = cmd
            .output()
            .await
            .context("Failed to spawn helm status")?;
        Ok(output.status.success())
    }

    async fn install(&self, release: &ChartRelease) -> Result<()> {
        info!(
            "Installing release '{}' (chart {} {})",
            release.release, release.chart, release.version
        );
        let mut cmd = self.base(release, "install");
        cmd.arg(&release.release)
            .arg(&release.chart)
            .arg("--version")
            .arg(&release.version)
            .arg("--create-namespace");
        for value in &release.values {
            cmd.arg("--set").arg(value);
        }
        run_command(cmd, "helm install").await.map(|_| ())
    }

    async fn upgrade(&self, release: &ChartRelease) -> Result<()> {
        info!(
            "Upgrading release '{}' to chart {} {}",
            release.release, release.chart, release.version
        );
        let mut cmd = self.base(release, "upgrade");
        cmd.arg(&release.release)
            .arg(&release.chart)
            .arg("--version")
            .arg(&release.version)
            .arg("--reuse-values");
        for value in &release.values {
            cmd.arg("--set").arg(value);
        }
        run_command(cmd, "helm upgrade").await.map(|_| ())
    }

    async fn uninstall(&self, release: &ChartRelease) -> Result<()> {
        info!("Uninstalling release '{}'", release.release);
        let mut cmd = self.base(release, "uninstall");
        cmd.arg(&release.release);
        run_command(cmd, "helm uninstall").await.map(|_| ())
    }
}

/// [`ReadinessChecker`] backed by `kubectl get pods`.
pub struct KubectlReadiness;

impl KubectlReadiness {
    pub fn new() -> Self {
        Self
    }

    async fn ready_pods(
        &self,
        cluster_context: &str,
        namespace: &str,
        label_selectors: &[String],
    ) -> Result<Vec<PodRef>> {
        let mut cmd = Command::new("kubectl");
        cmd.arg("get")
            .arg("pods")
            .arg("--namespace")
            .arg(namespace)
            .arg("--context")
            .arg(cluster_context)
            .arg("--selector")
            .arg(label_selectors.join(","))
            .arg("--output")
            .arg("json");
        let stdout = run_command(cmd, "kubectl get pods").await?;
        let doc: serde_json::Value =
            serde_json::from_str(&stdout).context("kubectl produced invalid JSON")?;

        let items = doc["items"].as_array().cloned().unwrap_or_default();
        if items.is_empty() {
            bail!("no pods match selector {:?}", label_selectors);
        }

        let mut pods = Vec::new();
        for item in &items {
            let name = item["metadata"]["name"].as_str().unwrap_or_default();
            let ready = item["status"]["conditions"]
                .as_array()
                .map(|conditions| {
                    conditions.iter().any(|c| {
                        c["type"].as_str() == Some("Ready")
                            && c["status"].as_str() == Some("True")
                    })
                })
                .unwrap_or(false);
            if !ready {
                bail!("pod '{}' is not ready", name);
            }
            pods.push(PodRef {
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }
        Ok(pods)
    }
}

#[async_trait]
impl ReadinessChecker for KubectlReadiness {
    async fn wait_for_pods_ready(
        &self,
        cluster_context: &str,
        namespace: &str,
        label_selectors: &[String],
        max_attempts: u32,
        delay: Duration,
    ) -> Result<Vec<PodRef>> {
        let description = format!("pods matching {label_selectors:?} in '{namespace}'");
        let pods = retry(&description, max_attempts, delay, || {
            self.ready_pods(cluster_context, namespace, label_selectors)
        })
        .await?;
        Ok(pods)
    }
}

/// [`LedgerClient`] that submits admin transactions through an external
/// command, so the ledger tooling stays swappable per environment.
pub struct LedgerCli {
    freeze_command: String,
}

impl LedgerCli {
    pub fn new() -> Self {
        Self {
            freeze_command: std::env::var("NETDEPLOY_FREEZE_CMD")
                .unwrap_or_else(|_| "ledger-admin freeze".to_string()),
        }
    }
}

#[async_trait]
impl LedgerClient for LedgerCli {
    async fn submit_freeze(&self, deployment: &str) -> Result<FreezeReceipt> {
        info!(
            "Submitting freeze transaction for deployment '{}'",
            deployment
        );
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.freeze_command);
        run_command(cmd, "freeze transaction").await?;
        Ok(FreezeReceipt {
            status: "SUCCESS".to_string(),
        })
    }
}
