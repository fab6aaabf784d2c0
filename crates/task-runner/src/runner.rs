//! Step tree execution

use crate::step::{Body, Concurrency, Step};
use crate::{Error, Result};
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Counts of what the run actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Leaf tasks that ran to completion
    pub executed: usize,
    /// Steps whose skip predicate fired (sub-trees count once)
    pub skipped: usize,
}

#[derive(Default)]
struct RunStats {
    executed: AtomicUsize,
    skipped: AtomicUsize,
}

/// The step-tree interpreter.
pub struct Pipeline;

impl Pipeline {
    /// Execute a step tree against a shared context.
    ///
    /// Returns the first failure, tagged with the slash-separated title
    /// path of the step that produced it.
    pub async fn run<C: Send + Sync + 'static>(root: Step<C>, ctx: Arc<C>) -> Result<RunReport> {
        let stats = Arc::new(RunStats::default());
        exec(root, ctx, String::new(), stats.clone()).await?;
        Ok(RunReport {
            executed: stats.executed.load(Ordering::SeqCst),
            skipped: stats.skipped.load(Ordering::SeqCst),
        })
    }
}

fn exec<C: Send + Sync + 'static>(
    step: Step<C>,
    ctx: Arc<C>,
    parent: String,
    stats: Arc<RunStats>,
) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move {
        let path = if parent.is_empty() {
            step.title.clone()
        } else {
            format!("{}/{}", parent, step.title)
        };

        // Skip predicates see the context as it is right now, not as it
        // was when the tree was built
        if let Some(skip) = &step.skip {
            if skip(&ctx) {
                info!("Skipping step '{}'", path);
                stats.skipped.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
        }

        match step.body {
            Body::Task(task) => {
                debug!("Running step '{}'", path);
                task(ctx).await.map_err(|source| Error::Step {
                    step: path.clone(),
                    source,
                })?;
                stats.executed.fetch_add(1, Ordering::SeqCst);
                debug!("Completed step '{}'", path);
                Ok(())
            }
            Body::Group { mode, children } => match mode {
                Concurrency::Sequential => {
                    for child in children {
                        exec(child, ctx.clone(), path.clone(), stats.clone()).await?;
                    }
                    Ok(())
                }
                Concurrency::Bounded(limit) => {
                    run_concurrent(children, ctx, path, stats, limit.max(1)).await
                }
                Concurrency::Unbounded => {
                    run_concurrent(children, ctx, path, stats, usize::MAX).await
                }
            },
        }
    })
}

/// Dispatch children concurrently with at most `limit` in flight.
///
/// After the first failure no new child is dispatched, but children
/// already in flight are drained; their outcomes do not override the
/// first error and their side effects stay (compensation is the job of
/// dedicated steps, not the engine).
async fn run_concurrent<C: Send + Sync + 'static>(
    children: Vec<Step<C>>,
    ctx: Arc<C>,
    path: String,
    stats: Arc<RunStats>,
    limit: usize,
) -> Result<()> {
    let mut pending = children.into_iter();
    let mut in_flight = FuturesUnordered::new();
    let mut first_err: Option<Error> = None;

    loop {
        while first_err.is_none() && in_flight.len() < limit {
            match pending.next() {
                Some(child) => {
                    in_flight.push(exec(child, ctx.clone(), path.clone(), stats.clone()))
                }
                None => break,
            }
        }

        match in_flight.next().await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                if first_err.is_none() {
                    debug!("Step '{}' aborting remaining siblings: {}", path, e);
                    first_err = Some(e);
                }
            }
            None => break,
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_io::Timer;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Ctx {
        log: Mutex<Vec<String>>,
        peak: AtomicUsize,
        running: AtomicUsize,
        flag: AtomicUsize,
    }

    impl Ctx {
        fn record(&self, entry: &str) {
            self.log.lock().unwrap().push(entry.to_string());
        }
    }

    fn note(name: &'static str) -> Step<Ctx> {
        Step::task(name, move |ctx: Arc<Ctx>| async move {
            ctx.record(name);
            Ok(())
        })
    }

    fn boom(name: &'static str) -> Step<Ctx> {
        Step::task(name, move |_ctx| async move {
            anyhow::bail!("{} exploded", name)
        })
    }

    #[smol_potat::test]
    async fn test_sequential_order_and_fail_fast() {
        let root = Step::group(
            "root",
            Concurrency::Sequential,
            vec![note("a"), note("b"), boom("c"), note("d")],
        );
        let ctx = Arc::new(Ctx::default());

        let err = Pipeline::run(root, ctx.clone()).await.unwrap_err();
        assert_eq!(err.step(), "root/c");
        assert_eq!(*ctx.log.lock().unwrap(), vec!["a", "b"]);
    }

    #[smol_potat::test]
    async fn test_concurrent_drains_in_flight_and_stops_dispatch() {
        // One slow sibling started before the failure must finish; the
        // sibling queued behind the failure must never start
        let slow = Step::task("slow", |ctx: Arc<Ctx>| async move {
            Timer::after(Duration::from_millis(50)).await;
            ctx.record("slow");
            Ok(())
        });
        let root = Step::group(
            "root",
            Concurrency::Bounded(2),
            vec![slow, boom("fast-fail"), note("never")],
        );
        let ctx = Arc::new(Ctx::default());

        let err = Pipeline::run(root, ctx.clone()).await.unwrap_err();
        assert_eq!(err.step(), "root/fast-fail");

        let log = ctx.log.lock().unwrap();
        assert!(log.contains(&"slow".to_string()));
        assert!(!log.contains(&"never".to_string()));
    }

    #[smol_potat::test]
    async fn test_bounded_pool_caps_in_flight() {
        let children: Vec<Step<Ctx>> = (0..10)
            .map(|i| {
                Step::task(format!("probe-{i}"), |ctx: Arc<Ctx>| async move {
                    let now = ctx.running.fetch_add(1, Ordering::SeqCst) + 1;
                    ctx.peak.fetch_max(now, Ordering::SeqCst);
                    Timer::after(Duration::from_millis(10)).await;
                    ctx.running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        let root = Step::group("root", Concurrency::Bounded(3), children);
        let ctx = Arc::new(Ctx::default());

        let report = Pipeline::run(root, ctx.clone()).await.unwrap();
        assert_eq!(report.executed, 10);
        assert!(ctx.peak.load(Ordering::SeqCst) <= 3);
    }

    #[smol_potat::test]
    async fn test_skip_reads_live_context() {
        // The first step mutates the context; the second step's predicate
        // must observe that mutation even though both predicates were
        // attached at construction time
        let arm = Step::task("arm", |ctx: Arc<Ctx>| async move {
            ctx.flag.store(1, Ordering::SeqCst);
            Ok(())
        });
        let guarded =
            note("guarded").skip_if(|ctx: &Ctx| ctx.flag.load(Ordering::SeqCst) == 1);

        let root = Step::group("root", Concurrency::Sequential, vec![arm, guarded]);
        let ctx = Arc::new(Ctx::default());

        let report = Pipeline::run(root, ctx.clone()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(ctx.log.lock().unwrap().is_empty());
    }

    #[smol_potat::test]
    async fn test_skipped_subtree_counts_once() {
        let subtree = Step::group(
            "sub",
            Concurrency::Sequential,
            vec![note("x"), note("y")],
        )
        .skip_if(|_| true);
        let root = Step::group("root", Concurrency::Sequential, vec![subtree, note("z")]);
        let ctx = Arc::new(Ctx::default());

        let report = Pipeline::run(root, ctx.clone()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.executed, 1);
        assert_eq!(*ctx.log.lock().unwrap(), vec!["z"]);
    }

    #[smol_potat::test]
    async fn test_nested_failure_names_full_path() {
        let root = Step::group(
            "deploy",
            Concurrency::Sequential,
            vec![Step::group(
                "node1",
                Concurrency::Sequential,
                vec![boom("install")],
            )],
        );
        let err = Pipeline::run(root, Arc::new(Ctx::default()))
            .await
            .unwrap_err();
        assert_eq!(err.step(), "deploy/node1/install");
        assert!(format!("{err}").contains("install exploded"));
    }
}
