use super::common::{Globals, print_json};
use crate::OutputFormat;
use crate::ui::table::recipes_table;
use anyhow::{Context, Result};
use rivet_core::paths;
use rivet_core::store::{MemoryStore, PackageStore};
use rivet_schema::{PackagesList, RecipeReference};
use std::collections::BTreeMap;
use std::sync::Arc;

fn stores(globals: &Globals, remote: Option<&str>, all_remotes: bool) -> Result<Vec<Arc<dyn PackageStore>>> {
    if remote.is_none() && !all_remotes {
        let cache: Arc<dyn PackageStore> = Arc::new(MemoryStore::open("cache", &paths::cache_path())?);
        return Ok(vec![cache]);
    }
    let config = globals.load_config()?;
    let mut stores: Vec<Arc<dyn PackageStore>> = Vec::new();
    for r in &config.remotes {
        if all_remotes || remote == Some(r.name.as_str()) {
            stores.push(Arc::new(MemoryStore::open(&r.name, &r.path)?));
        }
    }
    if let Some(name) = remote {
        anyhow::ensure!(!stores.is_empty(), "Remote '{name}' is not configured");
    }
    Ok(stores)
}

/// List recipe revisions matching `pattern` in the cache or in remotes.
pub fn list(
    globals: &Globals,
    pattern: &str,
    remote: Option<&str>,
    all_remotes: bool,
    format: OutputFormat,
) -> Result<()> {
    let mut rows: Vec<(String, RecipeReference)> = Vec::new();
    let mut documents: BTreeMap<String, PackagesList> = BTreeMap::new();

    for store in stores(globals, remote, all_remotes)? {
        let mut found = PackagesList::new();
        let matches = store
            .search(pattern)
            .with_context(|| format!("Search failed in '{}'", store.name()))?;
        for rref in matches {
            for revision in store.recipe_revisions(&rref)? {
                found.add_recipe(&revision);
                rows.push((store.name().to_string(), revision));
            }
        }
        documents.insert(store.name().to_string(), found);
    }

    match format {
        OutputFormat::Json => print_json(&documents)?,
        OutputFormat::Text if rows.is_empty() => {
            println!();
            println!("  No recipes match '{pattern}'.");
        }
        OutputFormat::Text => println!("{}", recipes_table(&rows)),
    }
    Ok(())
}
