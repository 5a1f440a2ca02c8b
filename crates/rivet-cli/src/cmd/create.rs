use super::common::{Globals, read_manifest};
use super::export::export_manifest;
use anyhow::Result;
use rivet_core::{GraphOptions, GraphRoot, InstallOptions};
use std::path::Path;

/// Export a recipe to the cache, then build its binary for the current profile.
///
/// The exported package is always built. Its dependencies follow `build`
/// (by default they must already have binaries).
pub async fn create(globals: &Globals, path: &Path, build: &[String]) -> Result<()> {
    let manifest = read_manifest(path)?;
    let rref = export_manifest(globals, &manifest, None)?;

    let session = globals.session()?;
    let root = GraphRoot::Requires {
        requires: vec![rref.clone()],
        tool_requires: Vec::new(),
    };
    let mut policies = vec![rref.without_revision().to_string()];
    policies.extend(build.iter().cloned());
    let options = InstallOptions {
        graph: GraphOptions::default(),
        build: policies,
    };

    session.install(&root, options).await?;
    if !globals.quiet {
        println!("{rref}");
    }
    Ok(())
}
