use super::common::{Globals, graph_options, graph_root, input_lockfile, parse_refs};
use crate::GraphArgs;
use anyhow::{Context, Result};
use rivet_core::lock;
use rivet_schema::{Context as LockContext, Lockfile};
use std::path::{Path, PathBuf};

fn load(path: &Path) -> Result<Lockfile> {
    Lockfile::load(path).with_context(|| format!("Failed to read lockfile {}", path.display()))
}

fn save(lockfile: &Lockfile, path: &Path) -> Result<()> {
    lockfile
        .save(path)
        .with_context(|| format!("Failed to write lockfile {}", path.display()))?;
    tracing::info!("Lockfile with {} node(s) written to {}", lockfile.len(), path.display());
    Ok(())
}

/// Resolve the graph and capture it. An existing output file is updated in place.
pub fn create(globals: &Globals, args: &GraphArgs, out: &Path, clean: bool) -> Result<()> {
    let session = globals.session()?;
    let root = graph_root(args)?;
    let input = input_lockfile(args)?;
    let graph = session.load_graph(&root, graph_options(args, input.as_ref()))?;
    graph.report_graph_error()?;

    let lockfile = if out.exists() {
        let mut lockfile = load(out)?;
        let changed = lock::update(&mut lockfile, &graph, clean);
        tracing::debug!("{changed} lockfile node(s) changed");
        lockfile
    } else {
        lock::create(&graph)
    };
    save(&lockfile, out)
}

/// Union of several lockfiles.
pub fn merge(files: &[PathBuf], out: &Path) -> Result<()> {
    let mut merged = Lockfile::new();
    for file in files {
        merged.merge(&load(file)?);
    }
    save(&merged, out)
}

/// Add references to a lockfile without resolving anything.
pub fn add(requires: &[String], build_requires: &[String], path: &Path) -> Result<()> {
    let mut lockfile = if path.exists() {
        load(path)?
    } else {
        Lockfile::new()
    };
    lockfile.add(parse_refs(requires)?, LockContext::Host);
    lockfile.add(parse_refs(build_requires)?, LockContext::Build);
    save(&lockfile, path)
}
