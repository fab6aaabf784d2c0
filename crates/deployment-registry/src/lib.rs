//! Versioned component registry for ledger network deployments.
//!
//! This crate owns the deployment state core: the tagged-union component
//! model (consensus nodes, relays, mirror nodes, explorers, proxies, block
//! nodes), the phase state machine governing each component's lifecycle,
//! and the snapshot persistence contract with optimistic concurrency.
//!
//! The registry is authoritative about *declared* state. Reconciling it
//! against what is actually running in a cluster is the job of the
//! readiness-check steps in the operation pipelines, not of this crate.
//!
//! ## Example
//!
//! ```rust
//! use deployment_registry::{
//!     ComponentPhase, ComponentRecord, ComponentSpec, DeploymentState,
//! };
//!
//! # fn example() -> deployment_registry::Result<()> {
//! let mut state = DeploymentState::new("deploy-cli");
//! state.register_cluster("c1", "kind-c1", "deploy-cli");
//!
//! let record = ComponentRecord::new(
//!     "node1",
//!     "c1",
//!     "ledger-ns",
//!     ComponentSpec::ConsensusNode {
//!         node_id: 0,
//!         account_id: "0.0.3".into(),
//!         gossip_endpoints: vec!["node1:50111".into()],
//!         grpc_endpoints: vec!["node1:50211".into()],
//!     },
//! );
//! let id = state.add_component(record, "deploy-cli")?;
//! state.change_phase(deployment_registry::ComponentKind::ConsensusNode, id,
//!     ComponentPhase::Deployed, "deploy-cli")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod backend;
mod error;
mod models;
mod phase;
mod state;

pub use backend::{SledStateBackend, StateBackend, VersionedSnapshot};
pub use error::{Error, Result};
pub use models::{ComponentKind, ComponentRecord, ComponentSpec};
pub use phase::ComponentPhase;
pub use state::{DeploymentState, StateMetadata};
