//! Plumbing shared by the commands: configuration, session, graph roots.

use crate::GraphArgs;
use crate::ui::reporter::TerminalReporter;
use anyhow::{Context, Result, bail, ensure};
use rivet_core::builder::{GraphOptions, GraphRoot};
use rivet_core::config::Config;
use rivet_core::recipe::{DeclaredRecipe, RecipeManifest};
use rivet_core::{NullReporter, Reporter, Session, paths};
use rivet_schema::{Lockfile, RecipeReference};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Global command line flags.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    pub config: Option<PathBuf>,
    pub quiet: bool,
}

impl Globals {
    /// The configuration file in effect.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(paths::config_path)
    }

    pub fn load_config(&self) -> Result<Config> {
        let path = self.config_path();
        Config::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    /// Session over the file-backed cache and remotes, reporting to the terminal.
    pub fn session(&self) -> Result<Session> {
        let config = self.load_config()?;
        let session = Session::open(config).context("Failed to open package stores")?;
        let reporter: Arc<dyn Reporter> = if self.quiet {
            Arc::new(NullReporter)
        } else {
            Arc::new(TerminalReporter::new())
        };
        Ok(session.with_reporter(reporter))
    }
}

pub fn parse_refs(refs: &[String]) -> Result<Vec<RecipeReference>> {
    refs.iter()
        .map(|r| RecipeReference::parse(r).with_context(|| format!("Invalid reference '{r}'")))
        .collect()
}

pub fn read_manifest(path: &Path) -> Result<RecipeManifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read recipe manifest {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid recipe manifest {}", path.display()))
}

/// Consumer manifest, or a virtual root over the command line references.
pub fn graph_root(args: &GraphArgs) -> Result<GraphRoot> {
    if let Some(path) = &args.path {
        let recipe = DeclaredRecipe::new(read_manifest(path)?)?;
        return Ok(GraphRoot::Consumer(Arc::new(recipe)));
    }
    if args.requires.is_empty() && args.tool_requires.is_empty() {
        bail!("Nothing to resolve: pass a recipe manifest or --requires/--tool-requires");
    }
    Ok(GraphRoot::Requires {
        requires: parse_refs(&args.requires)?,
        tool_requires: parse_refs(&args.tool_requires)?,
    })
}

/// The lockfile named by `--lockfile`, which must exist.
pub fn input_lockfile(args: &GraphArgs) -> Result<Option<Lockfile>> {
    let Some(path) = &args.lockfile else {
        return Ok(None);
    };
    ensure!(path.exists(), "Lockfile {} does not exist", path.display());
    let lockfile = Lockfile::load(path)
        .with_context(|| format!("Failed to read lockfile {}", path.display()))?;
    Ok(Some(lockfile))
}

pub fn graph_options<'a>(args: &GraphArgs, lockfile: Option<&'a Lockfile>) -> GraphOptions<'a> {
    GraphOptions {
        update: args.update,
        lockfile,
        lockfile_partial: args.lockfile_partial,
    }
}

pub fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{text}");
    Ok(())
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}
