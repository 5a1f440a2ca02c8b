use super::common::{Globals, graph_options, graph_root, input_lockfile, print_json};
use crate::{GraphArgs, OutputFormat};
use anyhow::{Context, Result};
use rivet_core::{InstallOptions, lock};
use rivet_schema::Lockfile;
use serde_json::json;
use std::path::Path;

/// Resolve, download and build everything the graph needs.
pub async fn install(
    globals: &Globals,
    args: &GraphArgs,
    build: &[String],
    lockfile_out: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let session = globals.session()?;
    let root = graph_root(args)?;
    let lockfile = input_lockfile(args)?;
    let options = InstallOptions {
        graph: graph_options(args, lockfile.as_ref()),
        build: build.to_vec(),
    };

    let (graph, summary) = session.install(&root, options).await?;

    if let Some(out) = lockfile_out {
        // An existing output lockfile is refreshed rather than replaced
        let lockfile = if out.exists() {
            let mut existing = Lockfile::load(out)
                .with_context(|| format!("Failed to read lockfile {}", out.display()))?;
            lock::update(&mut existing, &graph, false);
            existing
        } else {
            lock::create(&graph)
        };
        lockfile
            .save(out)
            .with_context(|| format!("Failed to write lockfile {}", out.display()))?;
        tracing::info!("Lockfile written to {}", out.display());
    }

    if format == OutputFormat::Json {
        print_json(&json!({
            "graph": graph.to_json(),
            "summary": {
                "downloaded": summary.downloaded,
                "built": summary.built,
                "elapsed_secs": summary.elapsed_secs,
            },
        }))?;
    }
    Ok(())
}
