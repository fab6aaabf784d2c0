use crate::runtime::Env;
use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use deployment_registry::{ComponentKind, ComponentPhase, DeploymentState};

pub async fn run(env: &Env, format: &str) -> Result<()> {
    if format != "table" && format != "json" {
        anyhow::bail!("Invalid format: {}. Must be 'table' or 'json'", format);
    }

    let Some((version, state)) = env.read_state().await? else {
        println!("No deployment state found for '{}'", env.deployment);
        return Ok(());
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!(
        "Deployment '{}' (snapshot version {}, last updated {} by {})",
        env.deployment,
        version,
        state.metadata.last_updated_at,
        state.metadata.last_updated_by
    );
    display_table(&state);
    Ok(())
}

fn display_table(state: &DeploymentState) {
    if state.component_count() == 0 {
        println!("No components registered");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["Kind", "Id", "Name", "Cluster", "Namespace", "Phase"]);

    for kind in ComponentKind::ALL {
        for record in state.list_components(kind) {
            table.add_row(vec![
                Cell::new(kind.to_string()),
                Cell::new(record.id.to_string()),
                Cell::new(&record.name),
                Cell::new(&record.cluster_ref),
                Cell::new(&record.namespace),
                phase_cell(record.phase),
            ]);
        }
    }

    println!("{table}");
}

fn phase_cell(phase: ComponentPhase) -> Cell {
    let color = match phase {
        ComponentPhase::Started => Color::Green,
        ComponentPhase::Frozen | ComponentPhase::Stopped => Color::Blue,
        ComponentPhase::Removed => Color::Red,
        _ => Color::Yellow,
    };
    Cell::new(phase.to_string()).fg(color)
}
