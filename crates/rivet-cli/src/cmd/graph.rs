use super::common::{Globals, graph_options, graph_root, input_lockfile, print_json, read_json};
use crate::ui::table::graph_table;
use crate::{GraphArgs, OutputFormat};
use anyhow::{Result, bail};
use rivet_core::{DepsGraph, InstallOrder};
use rivet_schema::BuildOrder;
use std::path::PathBuf;

fn analyze(globals: &Globals, args: &GraphArgs, build: &[String]) -> Result<DepsGraph> {
    let session = globals.session()?;
    let root = graph_root(args)?;
    let lockfile = input_lockfile(args)?;
    Ok(session.analyze(&root, graph_options(args, lockfile.as_ref()), build)?)
}

/// Print the dependency graph with binary status. A graph error is printed
/// along with the partial graph, then returned.
pub fn info(globals: &Globals, args: &GraphArgs, build: &[String], format: OutputFormat) -> Result<()> {
    let graph = analyze(globals, args, build)?;
    match format {
        OutputFormat::Json => print_json(&graph.to_json())?,
        OutputFormat::Text => {
            println!("{}", graph_table(&graph));
            for record in &graph.overrides {
                println!(
                    "  {} overridden to {} (required by {})",
                    record.requested,
                    record.resolved,
                    graph.node(record.requirer).label()
                );
            }
        }
    }
    if let Some(error) = &graph.error {
        bail!("{error}");
    }
    Ok(())
}

/// Print the build order of the graph as JSON.
pub fn build_order(globals: &Globals, args: &GraphArgs, build: &[String], flat: bool) -> Result<()> {
    let graph = analyze(globals, args, build)?;
    graph.report_graph_error()?;
    let order = InstallOrder::new(&graph).build_order(&graph, flat);
    print_json(&order)
}

/// Merge build orders computed for several configurations.
pub fn build_order_merge(files: &[PathBuf]) -> Result<()> {
    let mut merged: Option<BuildOrder> = None;
    for file in files {
        let order: BuildOrder = read_json(file)?;
        merged = Some(match merged {
            Some(acc) => acc.merge(&order),
            None => order,
        });
    }
    let Some(merged) = merged else {
        bail!("No build order files given");
    };
    print_json(&merged)
}
