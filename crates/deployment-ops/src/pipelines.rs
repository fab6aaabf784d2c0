//! Step trees for each deployment operation.
//!
//! Builders in this module turn operation parameters into
//! [`task_runner::Step`] trees over [`OpsContext`]. Conventions shared by
//! every pipeline:
//!
//! - registry writes happen only in sequential steps, followed by a
//!   checkpoint, so phases are committed in pipeline order;
//! - concurrent groups contain only read-only readiness checks;
//! - mutating steps are guarded by skip predicates over the *committed*
//!   phase, which is what makes a re-run after a crash idempotent.

use crate::collaborators::ChartRelease;
use crate::context::OpsContext;
use crate::Error;
use deployment_registry::{ComponentKind, ComponentPhase, ComponentRecord, ComponentSpec};
use std::sync::Arc;
use task_runner::{Concurrency, Step};
use tracing::{debug, info};

/// Chart coordinates for a component install.
#[derive(Debug, Clone)]
pub struct ChartSource {
    /// Chart reference (repo/chart)
    pub chart: String,
    /// Chart version
    pub version: String,
    /// Extra value arguments
    pub values: Vec<String>,
}

/// Parameters for adding one consensus node.
#[derive(Debug, Clone)]
pub struct ConsensusNodeParams {
    /// Node alias, unique within the deployment
    pub name: String,
    /// Target cluster reference
    pub cluster_ref: String,
    /// Target namespace
    pub namespace: String,
    /// Ledger-internal node id
    pub node_id: u64,
    /// Node account on the ledger
    pub account_id: String,
    /// Gossip endpoints
    pub gossip_endpoints: Vec<String>,
    /// gRPC endpoints
    pub grpc_endpoints: Vec<String>,
    /// Chart to install
    pub chart: ChartSource,
}

impl ConsensusNodeParams {
    fn release_name(&self) -> String {
        format!("network-{}", self.name)
    }
}

fn external<T>(operation: &str, result: anyhow::Result<T>) -> anyhow::Result<T> {
    result.map_err(|source| {
        Error::External {
            operation: operation.to_string(),
            source,
        }
        .into()
    })
}

fn chart_release_for(ctx: &OpsContext, params: &ConsensusNodeParams) -> anyhow::Result<ChartRelease> {
    let cluster_context = ctx.cluster_context(&params.cluster_ref)?;
    Ok(ChartRelease {
        namespace: params.namespace.clone(),
        release: params.release_name(),
        chart: params.chart.chart.clone(),
        version: params.chart.version.clone(),
        values: params.chart.values.clone(),
        cluster_context,
    })
}

/// Committed phase of the node this pipeline is adding, if registered.
fn node_phase(ctx: &OpsContext, params: &ConsensusNodeParams) -> Option<ComponentPhase> {
    ctx.phase_of(
        ComponentKind::ConsensusNode,
        &params.cluster_ref,
        &params.namespace,
    )
}

/// Build the "add consensus node" pipeline.
///
/// Safe to re-run after a crash at any point: each stage skips when the
/// committed phase shows it already happened, and the chart install asks
/// the installer before acting so a crash between the install and its
/// checkpoint does not install twice.
pub fn add_consensus_node(params: ConsensusNodeParams) -> Step<OpsContext> {
    let title = format!("add consensus node '{}'", params.name);

    let register = {
        let params = params.clone();
        Step::task("register component", move |ctx: Arc<OpsContext>| async move {
            if node_phase(&ctx, &params).is_some() {
                debug!("Node '{}' already registered, resuming", params.name);
                return Ok(());
            }
            let record = ComponentRecord::new(
                &params.name,
                &params.cluster_ref,
                &params.namespace,
                ComponentSpec::ConsensusNode {
                    node_id: params.node_id,
                    account_id: params.account_id.clone(),
                    gossip_endpoints: params.gossip_endpoints.clone(),
                    grpc_endpoints: params.grpc_endpoints.clone(),
                },
            );
            let actor = ctx.actor.clone();
            ctx.update_state(|state| state.add_component(record, &actor))?;
            ctx.checkpoint().await?;
            Ok(())
        })
    };

    let install = {
        let params = params.clone();
        let skip_params = params.clone();
        Step::task("install chart", move |ctx: Arc<OpsContext>| async move {
            let release = chart_release_for(&ctx, &params)?;
            if external("helm status", ctx.charts.is_installed(&release).await)? {
                info!("Release '{}' already installed", release.release);
            } else {
                external("helm install", ctx.charts.install(&release).await)?;
            }

            let id = ctx
                .id_of(
                    ComponentKind::ConsensusNode,
                    &params.cluster_ref,
                    &params.namespace,
                )
                .ok_or_else(|| anyhow::anyhow!("node '{}' vanished mid-pipeline", params.name))?;
            let actor = ctx.actor.clone();
            ctx.update_state(|state| {
                state.change_phase(
                    ComponentKind::ConsensusNode,
                    id,
                    ComponentPhase::Deployed,
                    &actor,
                )
            })?;
            ctx.checkpoint().await?;
            Ok(())
        })
        .skip_if(move |ctx: &OpsContext| {
            node_phase(ctx, &skip_params)
                .map(|phase| phase > ComponentPhase::Requested)
                .unwrap_or(false)
        })
    };

    let configure = {
        let params = params.clone();
        let skip_params = params.clone();
        Step::task("prepare node software", move |ctx: Arc<OpsContext>| async move {
            let cluster_context = ctx.cluster_context(&params.cluster_ref)?;
            let selectors = vec![format!("app=network-{}", params.name)];
            external(
                "wait for node pod",
                ctx.readiness
                    .wait_for_pods_ready(
                        &cluster_context,
                        &params.namespace,
                        &selectors,
                        ctx.config.readiness_attempts,
                        ctx.config.readiness_delay,
                    )
                    .await
                    .map(|_| ()),
            )?;

            let id = ctx
                .id_of(
                    ComponentKind::ConsensusNode,
                    &params.cluster_ref,
                    &params.namespace,
                )
                .ok_or_else(|| anyhow::anyhow!("node '{}' vanished mid-pipeline", params.name))?;
            let actor = ctx.actor.clone();
            ctx.update_state(|state| {
                state.change_phase(
                    ComponentKind::ConsensusNode,
                    id,
                    ComponentPhase::Configured,
                    &actor,
                )
            })?;
            ctx.checkpoint().await?;
            Ok(())
        })
        .skip_if(move |ctx: &OpsContext| {
            node_phase(ctx, &skip_params)
                .map(|phase| phase > ComponentPhase::Deployed)
                .unwrap_or(false)
        })
    };

    let start = {
        let skip_params = params.clone();
        let readiness_checks = Step::group(
            "await readiness",
            Concurrency::Unbounded,
            vec![
                readiness_check("gossip port ready", params.clone(), "gossip"),
                readiness_check("grpc port ready", params.clone(), "grpc"),
            ],
        );
        let mark_started = {
            let params = params.clone();
            Step::task("mark started", move |ctx: Arc<OpsContext>| async move {
                let id = ctx
                    .id_of(
                        ComponentKind::ConsensusNode,
                        &params.cluster_ref,
                        &params.namespace,
                    )
                    .ok_or_else(|| {
                        anyhow::anyhow!("node '{}' vanished mid-pipeline", params.name)
                    })?;
                let actor = ctx.actor.clone();
                ctx.update_state(|state| {
                    state.change_phase(
                        ComponentKind::ConsensusNode,
                        id,
                        ComponentPhase::Started,
                        &actor,
                    )
                })?;
                ctx.checkpoint().await?;
                Ok(())
            })
        };

        Step::group(
            "start node",
            Concurrency::Sequential,
            vec![readiness_checks, mark_started],
        )
        .skip_if(move |ctx: &OpsContext| {
            node_phase(ctx, &skip_params)
                .map(|phase| phase >= ComponentPhase::Started)
                .unwrap_or(false)
        })
    };

    Step::group(
        title,
        Concurrency::Sequential,
        vec![register, install, configure, start],
    )
}

/// Read-only readiness probe over one service port, used concurrently.
fn readiness_check(
    title: &str,
    params: ConsensusNodeParams,
    port_label: &'static str,
) -> Step<OpsContext> {
    Step::task(title, move |ctx: Arc<OpsContext>| async move {
        let cluster_context = ctx.cluster_context(&params.cluster_ref)?;
        let selectors = vec![
            format!("app=network-{}", params.name),
            format!("port={port_label}"),
        ];
        external(
            "wait for pods ready",
            ctx.readiness
                .wait_for_pods_ready(
                    &cluster_context,
                    &params.namespace,
                    &selectors,
                    ctx.config.readiness_attempts,
                    ctx.config.readiness_delay,
                )
                .await
                .map(|_| ()),
        )
    })
}

/// Register an auxiliary component (relay, proxy, mirror node, ...)
/// without driving it past `Requested`.
pub fn add_component(record: ComponentRecord) -> Step<OpsContext> {
    let title = format!("add {} '{}'", record.kind(), record.name);
    let skip_record = record.clone();

    Step::group(
        title,
        Concurrency::Sequential,
        vec![
            Step::task("register component", move |ctx: Arc<OpsContext>| async move {
                let actor = ctx.actor.clone();
                ctx.update_state(|state| state.add_component(record.clone(), &actor))?;
                ctx.checkpoint().await?;
                Ok(())
            })
            .skip_if(move |ctx: &OpsContext| {
                ctx.phase_of(
                    skip_record.kind(),
                    &skip_record.cluster_ref,
                    &skip_record.namespace,
                )
                .is_some()
            }),
        ],
    )
}

/// Register a cluster reference and its connection context.
pub fn register_cluster(cluster_ref: String, context: String) -> Step<OpsContext> {
    let title = format!("register cluster '{cluster_ref}'");
    Step::group(
        title,
        Concurrency::Sequential,
        vec![Step::task("record cluster", move |ctx: Arc<OpsContext>| async move {
            let actor = ctx.actor.clone();
            ctx.update_state(|state| {
                state.register_cluster(&cluster_ref, &context, &actor);
                Ok(())
            })?;
            ctx.checkpoint().await?;
            Ok(())
        })],
    )
}

/// Roll the chart of one consensus node to a new version in place.
///
/// Registry phases do not move; a rolled release is still the same
/// component in the same lifecycle position.
pub fn upgrade_node(id: u32, chart: ChartSource) -> Step<OpsContext> {
    Step::group(
        format!("upgrade consensus node {id}"),
        Concurrency::Sequential,
        vec![Step::task("upgrade chart", move |ctx: Arc<OpsContext>| async move {
            let (name, namespace, cluster_ref) = ctx.read_state(|state| {
                state
                    .get_component(ComponentKind::ConsensusNode, id)
                    .map(|r| (r.name.clone(), r.namespace.clone(), r.cluster_ref.clone()))
            })?;
            let release = ChartRelease {
                namespace,
                release: format!("network-{name}"),
                chart: chart.chart.clone(),
                version: chart.version.clone(),
                values: chart.values.clone(),
                cluster_context: ctx.cluster_context(&cluster_ref)?,
            };
            if !external("helm status", ctx.charts.is_installed(&release).await)? {
                anyhow::bail!(
                    "release '{}' is not installed; deploy the node before upgrading it",
                    release.release
                );
            }
            external("helm upgrade", ctx.charts.upgrade(&release).await)?;
            info!("Release '{}' now at {}", release.release, release.version);
            Ok(())
        })],
    )
}

/// Transition one consensus node `Started -> Stopped`.
pub fn stop_node(id: u32) -> Step<OpsContext> {
    Step::group(
        format!("stop consensus node {id}"),
        Concurrency::Sequential,
        vec![Step::task("mark stopped", move |ctx: Arc<OpsContext>| async move {
            let actor = ctx.actor.clone();
            ctx.update_state(|state| {
                state.change_phase(
                    ComponentKind::ConsensusNode,
                    id,
                    ComponentPhase::Stopped,
                    &actor,
                )
            })?;
            ctx.checkpoint().await?;
            Ok(())
        })],
    )
}

/// Transition one consensus node back to `Started` after a stop.
pub fn start_node(id: u32) -> Step<OpsContext> {
    Step::group(
        format!("start consensus node {id}"),
        Concurrency::Sequential,
        vec![Step::task("mark started", move |ctx: Arc<OpsContext>| async move {
            let actor = ctx.actor.clone();
            ctx.update_state(|state| {
                state.change_phase(
                    ComponentKind::ConsensusNode,
                    id,
                    ComponentPhase::Started,
                    &actor,
                )
            })?;
            ctx.checkpoint().await?;
            Ok(())
        })],
    )
}

fn all_nodes_in_phase(ctx: &OpsContext, phase: ComponentPhase) -> bool {
    ctx.read_state(|state| {
        let nodes = state.list_components(ComponentKind::ConsensusNode);
        !nodes.is_empty() && nodes.iter().all(|r| r.phase == phase)
    })
}

/// Build the coordinated network freeze pipeline.
///
/// The freeze transaction goes to the ledger first; only a successful
/// receipt moves the registry. Every consensus node must already be
/// Started, checked before the transaction is submitted so a doomed run
/// never leaves the ledger frozen with the registry untouched. A re-run
/// against an already-frozen network skips both steps.
pub fn freeze_network() -> Step<OpsContext> {
    let submit = Step::task("submit freeze transaction", |ctx: Arc<OpsContext>| async move {
        if !all_nodes_in_phase(&ctx, ComponentPhase::Started) {
            anyhow::bail!("refusing to submit freeze: not every consensus node is Started");
        }
        let receipt = external(
            "freeze transaction",
            ctx.ledger.submit_freeze(&ctx.deployment).await,
        )?;
        info!("Freeze transaction receipt: {}", receipt.status);
        Ok(())
    });

    let mark = Step::task("freeze registry", |ctx: Arc<OpsContext>| async move {
        let actor = ctx.actor.clone();
        ctx.update_state(|state| state.freeze_consensus_nodes(&actor))?;
        ctx.checkpoint().await?;
        Ok(())
    });

    Step::group("freeze network", Concurrency::Sequential, vec![submit, mark])
        .skip_if(|ctx: &OpsContext| all_nodes_in_phase(ctx, ComponentPhase::Frozen))
}

/// Build the network unfreeze pipeline.
pub fn unfreeze_network() -> Step<OpsContext> {
    Step::group(
        "unfreeze network",
        Concurrency::Sequential,
        vec![Step::task("thaw registry", |ctx: Arc<OpsContext>| async move {
            let actor = ctx.actor.clone();
            ctx.update_state(|state| state.unfreeze_consensus_nodes(&actor))?;
            ctx.checkpoint().await?;
            Ok(())
        })],
    )
    .skip_if(|ctx: &OpsContext| all_nodes_in_phase(ctx, ComponentPhase::Started))
}

/// Aliases of proxies and relays bound to a consensus node.
fn dependents_of(ctx: &OpsContext, node_name: &str) -> Vec<(ComponentKind, u32)> {
    ctx.read_state(|state| {
        let mut found = Vec::new();
        for kind in [ComponentKind::HaProxy, ComponentKind::EnvoyProxy] {
            for record in state.list_components(kind) {
                if let ComponentSpec::HaProxy {
                    consensus_node_alias,
                }
                | ComponentSpec::EnvoyProxy {
                    consensus_node_alias,
                } = &record.spec
                {
                    if consensus_node_alias == node_name {
                        found.push((kind, record.id));
                    }
                }
            }
        }
        for record in state.list_components(ComponentKind::Relay) {
            if let ComponentSpec::Relay {
                consensus_node_aliases,
            } = &record.spec
            {
                if consensus_node_aliases.iter().any(|a| a == node_name) {
                    found.push((ComponentKind::Relay, record.id));
                }
            }
        }
        found
    })
}

/// Build the destroy pipeline for one component.
///
/// Destroying a consensus node first detaches its dependents (proxies and
/// relays bound to it) so no record is left pointing at a removed node.
pub fn destroy_component(kind: ComponentKind, id: u32) -> Step<OpsContext> {
    let detach = Step::task("detach dependents", move |ctx: Arc<OpsContext>| async move {
        if kind != ComponentKind::ConsensusNode {
            return Ok(());
        }
        let node_name = ctx.read_state(|state| {
            state
                .get_component(kind, id)
                .map(|r| r.name.clone())
        })?;

        let actor = ctx.actor.clone();
        let dependents = dependents_of(&ctx, &node_name);
        if dependents.is_empty() {
            return Ok(());
        }

        info!(
            "Removing {} dependent component(s) of node '{}'",
            dependents.len(),
            node_name
        );
        ctx.update_state(|state| {
            for (dep_kind, dep_id) in &dependents {
                state.mark_removed(*dep_kind, *dep_id, &actor)?;
                state.remove_component(*dep_kind, *dep_id, &actor)?;
            }
            Ok(())
        })?;
        ctx.checkpoint().await?;
        Ok(())
    });

    let uninstall = Step::task("uninstall chart", move |ctx: Arc<OpsContext>| async move {
        let release = ctx.read_state(|state| {
            state.get_component(kind, id).map(|record| {
                let release = match &record.spec {
                    ComponentSpec::MirrorNode { release_name, .. }
                    | ComponentSpec::Explorer { release_name, .. } => release_name.clone(),
                    _ => format!("network-{}", record.name),
                };
                (release, record.namespace.clone(), record.cluster_ref.clone())
            })
        })?;
        let (release_name, namespace, cluster_ref) = release;
        let cluster_context = ctx.cluster_context(&cluster_ref)?;

        let release = ChartRelease {
            namespace,
            release: release_name,
            chart: String::new(),
            version: String::new(),
            values: Vec::new(),
            cluster_context,
        };
        if external("helm status", ctx.charts.is_installed(&release).await)? {
            external("helm uninstall", ctx.charts.uninstall(&release).await)?;
        }
        Ok(())
    });

    let remove = Step::task("remove record", move |ctx: Arc<OpsContext>| async move {
        let actor = ctx.actor.clone();
        ctx.update_state(|state| {
            state.mark_removed(kind, id, &actor)?;
            state.remove_component(kind, id, &actor)?;
            Ok(())
        })?;
        ctx.checkpoint().await?;
        Ok(())
    });

    Step::group(
        format!("destroy {kind} {id}"),
        Concurrency::Sequential,
        vec![detach, uninstall, remove],
    )
}
