use crate::runtime::Env;
use anyhow::Result;
use clap::Subcommand;
use deployment_ops::Operation;

#[derive(Subcommand)]
pub enum NetworkCommands {
    /// Freeze every consensus node via a coordinated ledger transaction
    Freeze,

    /// Return every frozen consensus node to started
    Unfreeze,
}

pub async fn run(env: &Env, command: NetworkCommands) -> Result<()> {
    let runner = env.runner().await?;
    match command {
        NetworkCommands::Freeze => {
            runner.run(Operation::FreezeNetwork).await?;
            println!("Network frozen");
        }
        NetworkCommands::Unfreeze => {
            runner.run(Operation::UnfreezeNetwork).await?;
            println!("Network unfrozen");
        }
    }
    Ok(())
}
