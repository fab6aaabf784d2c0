//! Step-tree pipeline engine.
//!
//! One CLI invocation builds one tree of named steps and runs it to
//! completion. A step either carries a leaf task or a group of children
//! executed sequentially or concurrently; a skip predicate is evaluated
//! against the shared run context immediately before dispatch, never at
//! tree-construction time.
//!
//! The engine is deliberately dumb about recovery: the first uncaught
//! failure aborts the remaining siblings (fail-fast), concurrent siblings
//! already in flight are drained, nothing is rolled back and nothing is
//! retried. Retry belongs inside specific collaborator calls (see
//! [`retry`]); rollback belongs to compensating steps.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use task_runner::{Concurrency, Pipeline, Step};
//!
//! # fn example() {
//! struct Ctx { dry_run: bool }
//!
//! let root = Step::group(
//!     "deploy",
//!     Concurrency::Sequential,
//!     vec![
//!         Step::task("install chart", |_ctx: Arc<Ctx>| async { Ok(()) })
//!             .skip_if(|ctx: &Ctx| ctx.dry_run),
//!         Step::group(
//!             "await readiness",
//!             Concurrency::Unbounded,
//!             vec![
//!                 Step::task("gossip port", |_ctx| async { Ok(()) }),
//!                 Step::task("grpc port", |_ctx| async { Ok(()) }),
//!             ],
//!         ),
//!     ],
//! );
//!
//! let report = smol::block_on(Pipeline::run(root, Arc::new(Ctx { dry_run: false })));
//! assert_eq!(report.unwrap().executed, 3);
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod retry;
mod runner;
mod step;

pub use retry::{RetryError, retry};
pub use runner::{Pipeline, RunReport};
pub use step::{Concurrency, Step};

use thiserror::Error;

/// Pipeline engine error type
#[derive(Error, Debug)]
pub enum Error {
    /// A step's task returned an error
    #[error("step '{step}' failed: {source:#}")]
    Step {
        /// Slash-separated title path of the failing step
        step: String,
        /// The underlying failure with its cause chain
        source: anyhow::Error,
    },
}

impl Error {
    /// The title path of the failing step.
    pub fn step(&self) -> &str {
        match self {
            Error::Step { step, .. } => step,
        }
    }

    /// The underlying cause of the failure.
    pub fn into_source(self) -> anyhow::Error {
        match self {
            Error::Step { source, .. } => source,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
