//! Operation pipelines for ledger network deployments.
//!
//! This crate wires the deployment state core together: every operation
//! acquires the deployment lock, loads and validates the registry
//! snapshot, runs a step tree that calls external collaborators and
//! mutates the registry, checkpoints the snapshot after each mutating
//! step, and always releases the lock on the way out.
//!
//! The collaborators (chart installer, readiness checker, ledger client)
//! are narrow async traits implemented elsewhere; this crate only defines
//! the seams and ships mock implementations for tests.

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod collaborators;
mod context;
pub mod pipelines;
mod runner;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use collaborators::{
    ChartInstaller, ChartRelease, FreezeReceipt, LedgerClient, PodRef, ReadinessChecker,
};
pub use context::OpsContext;
pub use pipelines::{ChartSource, ConsensusNodeParams};
pub use runner::{Collaborators, Operation, OperationRunner, RunnerConfig};

/// Error types for operation execution
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Registry or snapshot persistence errors
    #[error("registry error: {0}")]
    Registry(#[from] deployment_registry::Error),

    /// Lease acquisition or renewal errors
    #[error("{0}")]
    Lock(#[from] deployment_lock::Error),

    /// A pipeline step failed
    #[error("{0}")]
    Pipeline(#[from] task_runner::Error),

    /// A collaborator call failed after exhausting its local retries
    #[error("external operation '{operation}' failed: {source:#}")]
    External {
        /// Which collaborator call failed
        operation: String,
        /// Underlying failure and its cause chain
        source: anyhow::Error,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
