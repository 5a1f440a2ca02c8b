use super::common::{Globals, read_manifest};
use anyhow::{Context, Result};
use rivet_core::paths;
use rivet_core::recipe::{DeclaredRecipe, RecipeManifest};
use rivet_core::store::{MemoryStore, PackageStore};
use rivet_schema::RecipeReference;
use std::path::Path;

/// Export a recipe manifest into the local cache, or into a configured remote.
pub fn export(globals: &Globals, path: &Path, remote: Option<&str>) -> Result<()> {
    let manifest = read_manifest(path)?;
    let rref = export_manifest(globals, &manifest, remote)
        .with_context(|| format!("Failed to export {}", path.display()))?;
    if !globals.quiet {
        println!("{rref}");
    }
    Ok(())
}

/// Store `manifest` as a new recipe revision; returns the revisioned reference.
pub fn export_manifest(
    globals: &Globals,
    manifest: &RecipeManifest,
    remote: Option<&str>,
) -> Result<RecipeReference> {
    // Rejects manifests whose declarations cannot be loaded
    DeclaredRecipe::new(manifest.clone())?;

    let store = match remote {
        None => MemoryStore::open("cache", &paths::cache_path())?,
        Some(name) => {
            let config = globals.load_config()?;
            let remote = config
                .remotes
                .iter()
                .find(|r| r.name == name)
                .with_context(|| format!("Remote '{name}' is not configured"))?;
            MemoryStore::open(&remote.name, &remote.path)?
        }
    };

    let rref = store.add_recipe(manifest, chrono::Utc::now().timestamp())?;
    tracing::info!(store = store.name(), "exported {}", rref.repr_full());
    Ok(rref)
}
