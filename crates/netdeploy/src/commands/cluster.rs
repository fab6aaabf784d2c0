use crate::runtime::Env;
use anyhow::Result;
use clap::Subcommand;
use deployment_ops::Operation;

#[derive(Subcommand)]
pub enum ClusterCommands {
    /// Register a cluster reference and its connection context
    Register {
        /// Cluster reference used by component records
        cluster_ref: String,

        /// Connection context (e.g. a kubeconfig context name)
        #[arg(long)]
        context: String,
    },

    /// List registered cluster references
    List,
}

pub async fn run(env: &Env, command: ClusterCommands) -> Result<()> {
    match command {
        ClusterCommands::Register {
            cluster_ref,
            context,
        } => {
            let runner = env.runner().await?;
            runner
                .run(Operation::RegisterCluster {
                    cluster_ref: cluster_ref.clone(),
                    context,
                })
                .await?;
            println!("Registered cluster '{cluster_ref}'");
            Ok(())
        }
        ClusterCommands::List => {
            let Some((_, state)) = env.read_state().await? else {
                println!("No deployment state found for '{}'", env.deployment);
                return Ok(());
            };
            if state.clusters.is_empty() {
                println!("No clusters registered");
            }
            for (cluster_ref, context) in &state.clusters {
                println!("{cluster_ref}\t{context}");
            }
            Ok(())
        }
    }
}
