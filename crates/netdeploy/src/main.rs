//! Deployment CLI for ledger networks.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod exec;
mod runtime;

#[derive(Parser)]
#[command(name = "netdeploy")]
#[command(about = "Ledger network deployment tool")]
#[command(version)]
struct Cli {
    /// Deployment name
    #[arg(short, long, global = true, default_value = "default")]
    deployment: String,

    /// Actor recorded in registry metadata (defaults to $USER)
    #[arg(long, global = true)]
    actor: Option<String>,

    /// Data directory for registry and lock databases
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Seconds to wait for the deployment lock
    #[arg(long, global = true, default_value_t = 300)]
    lock_timeout: u64,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster reference management
    Cluster {
        #[command(subcommand)]
        command: commands::cluster::ClusterCommands,
    },

    /// Consensus node operations
    Node {
        #[command(subcommand)]
        command: commands::node::NodeCommands,
    },

    /// Coordinated network operations
    Network {
        #[command(subcommand)]
        command: commands::network::NetworkCommands,
    },

    /// Tear down a component and remove its record
    Destroy {
        /// Component kind (e.g. consensus-node, relay, haproxy)
        #[arg(long)]
        kind: String,

        /// Registry id of the component
        #[arg(long)]
        id: u32,
    },

    /// Show registered components and their phases
    Status {
        /// Output format: table or json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Deployment lock management
    Lock {
        #[command(subcommand)]
        command: commands::lock::LockCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match smol::block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            if let Some(deployment_ops::Error::Lock(deployment_lock::Error::LockTimeout {
                ..
            })) = err.downcast_ref::<deployment_ops::Error>()
            {
                eprintln!(
                    "Hint: if the holding operation crashed, \
                     run 'netdeploy lock break --force' to clear the lease."
                );
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let env = runtime::Env::from_cli(
        cli.deployment,
        cli.actor,
        cli.data_dir,
        cli.lock_timeout,
    )?;

    match cli.command {
        Commands::Cluster { command } => commands::cluster::run(&env, command).await,
        Commands::Node { command } => commands::node::run(&env, command).await,
        Commands::Network { command } => commands::network::run(&env, command).await,
        Commands::Destroy { kind, id } => commands::destroy::run(&env, &kind, id).await,
        Commands::Status { format } => commands::status::run(&env, &format).await,
        Commands::Lock { command } => commands::lock::run(&env, command).await,
    }
}
