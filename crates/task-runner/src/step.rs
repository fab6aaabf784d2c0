//! Step tree construction

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// How a group dispatches its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// One child at a time, in order
    Sequential,
    /// Up to the given number of leaf tasks in flight at once
    Bounded(usize),
    /// No cap; reserved for read-only, idempotent checks
    Unbounded,
}

pub(crate) type SkipFn<C> = Box<dyn Fn(&C) -> bool + Send + Sync>;
pub(crate) type TaskFn<C> = Box<dyn FnOnce(Arc<C>) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

pub(crate) enum Body<C> {
    Task(TaskFn<C>),
    Group {
        mode: Concurrency,
        children: Vec<Step<C>>,
    },
}

/// One node of a pipeline tree: a titled leaf task or a group of children.
pub struct Step<C> {
    pub(crate) title: String,
    pub(crate) skip: Option<SkipFn<C>>,
    pub(crate) body: Body<C>,
}

impl<C: Send + Sync + 'static> Step<C> {
    /// A leaf step running one async task against the shared context.
    pub fn task<F, Fut>(title: impl Into<String>, task: F) -> Self
    where
        F: FnOnce(Arc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            title: title.into(),
            skip: None,
            body: Body::Task(Box::new(move |ctx| task(ctx).boxed())),
        }
    }

    /// A group step dispatching its children with the given mode.
    pub fn group(title: impl Into<String>, mode: Concurrency, children: Vec<Step<C>>) -> Self {
        Self {
            title: title.into(),
            skip: None,
            body: Body::Group { mode, children },
        }
    }

    /// Attach a skip predicate, evaluated against the live context
    /// immediately before the step is dispatched.
    pub fn skip_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Box::new(predicate));
        self
    }

    /// The step's title.
    pub fn title(&self) -> &str {
        &self.title
    }
}
