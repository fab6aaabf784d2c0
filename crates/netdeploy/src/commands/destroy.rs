use crate::runtime::Env;
use anyhow::{Context, Result};
use deployment_ops::Operation;
use deployment_registry::ComponentKind;

pub async fn run(env: &Env, kind: &str, id: u32) -> Result<()> {
    let kind: ComponentKind = kind
        .parse()
        .with_context(|| format!("Unknown component kind '{kind}'"))?;

    let runner = env.runner().await?;
    runner
        .run(Operation::DestroyComponent { kind, id })
        .await?;
    println!("Destroyed {kind} {id}");
    Ok(())
}
