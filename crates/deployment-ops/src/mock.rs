//! In-memory collaborator implementations for tests.

use crate::collaborators::{
    ChartInstaller, ChartRelease, FreezeReceipt, LedgerClient, PodRef, ReadinessChecker,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Chart installer that tracks installed releases in memory.
#[derive(Default)]
pub struct MockChartInstaller {
    installed: Mutex<HashSet<String>>,
    /// Times `install` actually ran
    pub install_calls: AtomicUsize,
    /// Times `uninstall` actually ran
    pub uninstall_calls: AtomicUsize,
    /// When set, `install` fails without recording the release
    pub fail_install: AtomicBool,
}

impl MockChartInstaller {
    /// Fresh installer with nothing installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a release key is currently recorded as installed.
    pub fn has_release(&self, release: &ChartRelease) -> bool {
        self.installed
            .lock()
            .expect("poisoned")
            .contains(&release.key())
    }
}

#[async_trait]
impl ChartInstaller for MockChartInstaller {
    async fn is_installed(&self, release: &ChartRelease) -> anyhow::Result<bool> {
        Ok(self.has_release(release))
    }

    async fn install(&self, release: &ChartRelease) -> anyhow::Result<()> {
        if self.fail_install.load(Ordering::SeqCst) {
            anyhow::bail!("helm install failed for '{}'", release.release);
        }
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        self.installed
            .lock()
            .expect("poisoned")
            .insert(release.key());
        Ok(())
    }

    async fn upgrade(&self, release: &ChartRelease) -> anyhow::Result<()> {
        if !self.has_release(release) {
            anyhow::bail!("release '{}' is not installed", release.release);
        }
        Ok(())
    }

    async fn uninstall(&self, release: &ChartRelease) -> anyhow::Result<()> {
        self.uninstall_calls.fetch_add(1, Ordering::SeqCst);
        self.installed
            .lock()
            .expect("poisoned")
            .remove(&release.key());
        Ok(())
    }
}

/// Readiness checker whose answer is a flippable flag.
pub struct MockReadinessChecker {
    /// When false, every wait fails immediately
    pub ready: AtomicBool,
}

impl MockReadinessChecker {
    /// A checker that reports every pod ready.
    pub fn ready() -> Self {
        Self {
            ready: AtomicBool::new(true),
        }
    }

    /// A checker that fails every wait until flipped.
    pub fn not_ready() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ReadinessChecker for MockReadinessChecker {
    async fn wait_for_pods_ready(
        &self,
        _cluster_context: &str,
        namespace: &str,
        label_selectors: &[String],
        _max_attempts: u32,
        _delay: Duration,
    ) -> anyhow::Result<Vec<PodRef>> {
        if !self.ready.load(Ordering::SeqCst) {
            anyhow::bail!("pods matching {:?} never became ready", label_selectors);
        }
        Ok(vec![PodRef {
            name: format!("{}-0", label_selectors.first().cloned().unwrap_or_default()),
            namespace: namespace.to_string(),
        }])
    }
}

/// Ledger client that acknowledges every freeze.
#[derive(Default)]
pub struct MockLedgerClient {
    /// Freeze transactions submitted
    pub freeze_calls: AtomicUsize,
}

impl MockLedgerClient {
    /// Fresh client with no submissions recorded.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn submit_freeze(&self, _deployment: &str) -> anyhow::Result<FreezeReceipt> {
        self.freeze_calls.fetch_add(1, Ordering::SeqCst);
        Ok(FreezeReceipt {
            status: "SUCCESS".to_string(),
        })
    }
}
