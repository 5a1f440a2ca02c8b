//! Collaborators of one engine run.

use crate::binaries::{BinaryResolver, BuildPolicy, check_binaries};
use crate::builder::{GraphBuilder, GraphOptions, GraphRoot};
use crate::config::Config;
use crate::error::Result;
use crate::executor::{Executor, InstallSummary};
use crate::graph::DepsGraph;
use crate::installer::StoreInstaller;
use crate::recipe::{DeclarativeLoader, RecipeLoader};
use crate::reporter::{NullReporter, Reporter};
use crate::store::{CacheStore, MemoryStore, PackageStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration, stores, recipe loader and reporter, passed explicitly
/// to every engine component.
pub struct Session {
    /// User configuration.
    pub config: Config,
    /// Local cache.
    pub cache: Arc<dyn CacheStore>,
    /// Remotes in priority order.
    pub remotes: Vec<Arc<dyn PackageStore>>,
    /// Turns manifests into recipes.
    pub loader: Arc<dyn RecipeLoader>,
    /// User-facing progress.
    pub reporter: Arc<dyn Reporter>,
    /// Where builds run.
    pub build_root: PathBuf,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cache", &self.cache.name())
            .field(
                "remotes",
                &self.remotes.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("build_root", &self.build_root)
            .finish_non_exhaustive()
    }
}

/// Options of [`Session::install`].
#[derive(Debug, Clone, Default)]
pub struct InstallOptions<'a> {
    /// Graph expansion options.
    pub graph: GraphOptions<'a>,
    /// `--build` arguments; empty uses the configured default.
    pub build: Vec<String>,
}

impl Session {
    /// Session over a cache with no remotes, a declarative loader and no output.
    pub fn new(config: Config, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            config,
            cache,
            remotes: Vec::new(),
            loader: Arc::new(DeclarativeLoader),
            reporter: Arc::new(NullReporter),
            build_root: std::env::temp_dir().join("rivet-builds"),
        }
    }

    /// Open the file-backed cache and the configured remotes.
    ///
    /// # Errors
    ///
    /// Returns an error if a store file exists but cannot be read.
    pub fn open(config: Config) -> Result<Self> {
        let cache = MemoryStore::open("cache", &crate::paths::cache_path())?;
        let mut remotes: Vec<Arc<dyn PackageStore>> = Vec::new();
        for remote in &config.remotes {
            remotes.push(Arc::new(MemoryStore::open(&remote.name, &remote.path)?));
        }
        let mut session = Self::new(config, Arc::new(cache)).with_remotes(remotes);
        session.build_root = crate::paths::build_path();
        Ok(session)
    }

    /// Append a remote.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn PackageStore>) -> Self {
        self.remotes.push(remote);
        self
    }

    /// Replace the remotes.
    #[must_use]
    pub fn with_remotes(mut self, remotes: Vec<Arc<dyn PackageStore>>) -> Self {
        self.remotes = remotes;
        self
    }

    /// Replace the reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replace the recipe loader.
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn RecipeLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Replace the build folder root.
    #[must_use]
    pub fn with_build_root(mut self, build_root: PathBuf) -> Self {
        self.build_root = build_root;
        self
    }

    /// Expand the graph of `root`. Graph errors are left on the graph.
    ///
    /// # Errors
    ///
    /// Range, lockfile, store and recipe failures.
    pub fn load_graph(&self, root: &GraphRoot, options: GraphOptions<'_>) -> Result<DepsGraph> {
        self.reporter.section("Computing dependency graph");
        GraphBuilder::new(self, options).load_graph(root)
    }

    /// Expand the graph and evaluate binaries.
    ///
    /// # Errors
    ///
    /// As [`Session::load_graph`], plus a bad build policy and package id
    /// failures. Graph and binary errors are left on the graph.
    pub fn analyze(
        &self,
        root: &GraphRoot,
        options: GraphOptions<'_>,
        build: &[String],
    ) -> Result<DepsGraph> {
        let mut graph = self.load_graph(root, options)?;
        if graph.error.is_some() {
            return Ok(graph);
        }
        let policy = self.build_policy(build)?;
        BinaryResolver::new(self, &policy, options.update).evaluate_graph(&mut graph)?;
        Ok(graph)
    }

    /// Full install: expand, evaluate binaries, fail on graph or binary
    /// errors, then download and build.
    ///
    /// # Errors
    ///
    /// Any engine error, including aggregated binary and execution errors.
    pub async fn install(
        &self,
        root: &GraphRoot,
        options: InstallOptions<'_>,
    ) -> Result<(DepsGraph, InstallSummary)> {
        let mut graph = self.analyze(root, options.graph, &options.build)?;
        graph.report_graph_error()?;
        check_binaries(&graph)?;

        self.reporter.section("Installing packages");
        let policy = self.build_policy(&options.build)?;
        let computer = *BinaryResolver::new(self, &policy, options.graph.update).computer();
        let installer = Arc::new(StoreInstaller::new(
            self.cache.clone(),
            self.remotes.clone(),
            self.build_root.clone(),
        ));
        let summary = Executor::new(self.config.jobs(), self.reporter.clone())
            .run(&mut graph, installer, &computer)
            .await?;
        Ok((graph, summary))
    }

    fn build_policy(&self, build: &[String]) -> Result<BuildPolicy> {
        let args = if build.is_empty() {
            self.config.build_policy.as_slice()
        } else {
            build
        };
        Ok(BuildPolicy::parse(args)?)
    }
}
