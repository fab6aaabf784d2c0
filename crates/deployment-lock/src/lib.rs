//! Distributed lease manager for deployment operations.
//!
//! At most one process at a time may mutate a deployment's registry. This
//! crate provides the advisory, time-bounded lease that enforces it: a
//! lease document stored in a backend whose conditional operations (create
//! if absent, compare-and-swap replace) give true mutual exclusion, not a
//! best-effort read-then-write.
//!
//! Collaborators must cooperate: the lease is advisory, but every mutating
//! entry point in the operation runner refuses to proceed without first
//! holding it.

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod backend;
mod error;
mod lease;
mod manager;

pub use backend::{LeaseBackend, SledLeaseBackend};
pub use error::{Error, Result};
pub use lease::Lease;
pub use manager::LockManager;
