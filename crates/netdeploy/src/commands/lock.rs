use crate::runtime::Env;
use anyhow::Result;
use clap::Subcommand;
use deployment_lock::LeaseBackend;

#[derive(Subcommand)]
pub enum LockCommands {
    /// Show the current lease, if any
    Show,

    /// Delete the lease regardless of holder
    ///
    /// Only for recovering from a crashed operation; breaking a lock that
    /// is still in use lets two operations write the same deployment.
    Break {
        /// Actually break the lock
        #[arg(long)]
        force: bool,
    },
}

pub async fn run(env: &Env, command: LockCommands) -> Result<()> {
    match command {
        LockCommands::Show => {
            let backend = env.lease_backend().await?;
            match backend.get(&env.deployment).await? {
                Some(lease) => {
                    let status = if lease.is_expired() { "expired" } else { "live" };
                    println!(
                        "Deployment '{}' locked by '{}' since {} (expires {}, {})",
                        lease.deployment,
                        lease.holder,
                        lease.acquired_at,
                        lease.expires_at,
                        status
                    );
                }
                None => println!("Deployment '{}' is not locked", env.deployment),
            }
            Ok(())
        }
        LockCommands::Break { force } => {
            if !force {
                anyhow::bail!(
                    "Refusing to break the lock without --force; \
                     a live holder may still be writing this deployment"
                );
            }
            let locks = env.lock_manager().await?;
            locks.force_break(&env.deployment).await?;
            println!("Lock on deployment '{}' broken", env.deployment);
            Ok(())
        }
    }
}
