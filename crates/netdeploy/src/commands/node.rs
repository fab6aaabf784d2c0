use crate::runtime::Env;
use anyhow::Result;
use clap::Subcommand;
use deployment_ops::{ChartSource, ConsensusNodeParams, Operation};

#[derive(Subcommand)]
pub enum NodeCommands {
    /// Register, deploy, configure and start a consensus node
    Add {
        /// Node alias, unique within the deployment
        name: String,

        /// Cluster reference the node deploys to
        #[arg(long)]
        cluster: String,

        /// Target namespace
        #[arg(long)]
        namespace: String,

        /// Ledger-internal node id
        #[arg(long)]
        node_id: u64,

        /// Node account on the ledger (e.g. 0.0.3)
        #[arg(long)]
        account: String,

        /// Gossip endpoint, repeatable
        #[arg(long = "gossip")]
        gossip_endpoints: Vec<String>,

        /// gRPC endpoint, repeatable
        #[arg(long = "grpc")]
        grpc_endpoints: Vec<String>,

        /// Chart reference to install
        #[arg(long, default_value = "charts/network-node")]
        chart: String,

        /// Chart version
        #[arg(long)]
        chart_version: String,

        /// Chart value override, repeatable (key=value)
        #[arg(long = "set")]
        values: Vec<String>,
    },

    /// Roll a node's chart to a new version in place
    Upgrade {
        /// Registry id of the node
        id: u32,

        /// Chart reference to upgrade to
        #[arg(long, default_value = "charts/network-node")]
        chart: String,

        /// Chart version
        #[arg(long)]
        chart_version: String,

        /// Chart value override, repeatable (key=value)
        #[arg(long = "set")]
        values: Vec<String>,
    },

    /// Transition a stopped node back to started
    Start {
        /// Registry id of the node
        id: u32,
    },

    /// Transition a started node to stopped
    Stop {
        /// Registry id of the node
        id: u32,
    },
}

pub async fn run(env: &Env, command: NodeCommands) -> Result<()> {
    let runner = env.runner().await?;
    match command {
        NodeCommands::Add {
            name,
            cluster,
            namespace,
            node_id,
            account,
            gossip_endpoints,
            grpc_endpoints,
            chart,
            chart_version,
            values,
        } => {
            let params = ConsensusNodeParams {
                name: name.clone(),
                cluster_ref: cluster,
                namespace,
                node_id,
                account_id: account,
                gossip_endpoints,
                grpc_endpoints,
                chart: ChartSource {
                    chart,
                    version: chart_version,
                    values,
                },
            };
            runner
                .run(Operation::AddConsensusNode(Box::new(params)))
                .await?;
            println!("Consensus node '{name}' is started");
        }
        NodeCommands::Upgrade {
            id,
            chart,
            chart_version,
            values,
        } => {
            runner
                .run(Operation::UpgradeNode {
                    id,
                    chart: ChartSource {
                        chart,
                        version: chart_version,
                        values,
                    },
                })
                .await?;
            println!("Node {id} upgraded");
        }
        NodeCommands::Start { id } => {
            runner.run(Operation::StartNode { id }).await?;
            println!("Node {id} started");
        }
        NodeCommands::Stop { id } => {
            runner.run(Operation::StopNode { id }).await?;
            println!("Node {id} stopped");
        }
    }
    Ok(())
}
