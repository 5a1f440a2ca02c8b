//! Level-parallel installation.
//!
//! Levels run one after the other; the download and build tasks of a level
//! run concurrently on a [`JoinSet`], bounded by a [`Semaphore`]. When a
//! task fails the rest of its level still drains, then the failures are
//! returned together and no later level starts.

use crate::graph::{DepsGraph, NodeId};
use crate::install_order::InstallOrder;
use crate::package_id::PackageIdComputer;
use crate::recipe::{Configuration, Recipe, RecipeError};
use crate::reporter::Reporter;
use crate::store::StoreError;
use rivet_schema::{BinaryStatus, PkgReference, RecipeReference};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Failure of a single install task.
#[derive(Error, Debug)]
pub enum InstallError {
    /// Store read or write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A recipe hook failed.
    #[error(transparent)]
    Recipe(#[from] RecipeError),

    /// Filesystem error around the build folders.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote holding the binary is not configured.
    #[error("Remote '{0}' is not configured")]
    UnknownRemote(String),

    /// The binary disappeared from the remote.
    #[error("Package '{pref}' not found in remote '{remote}'")]
    NotFound {
        /// Package reference.
        pref: String,
        /// Remote name.
        remote: String,
    },

    /// The task has nothing to run with (no recipe, no remote, no id).
    #[error("Cannot install '{0}': {1}")]
    Unavailable(String, String),

    /// The worker task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Join(String),
}

/// Every failure of the level that stopped the install.
#[derive(Error, Debug)]
#[error("{} package(s) failed to install:\n{}", .failures.len(), format_failures(.failures))]
pub struct ExecutionError {
    /// `(reference, message)` per failed task.
    pub failures: Vec<(String, String)>,
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(reference, message)| format!("  {reference}: {message}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Work item handed to a [`NodeInstaller`].
#[derive(Debug, Clone)]
pub struct InstallTask {
    /// Graph node.
    pub node: NodeId,
    /// Revisioned recipe reference.
    pub reference: RecipeReference,
    /// Binary to fetch (with revision), or to produce (without).
    pub pref: PkgReference,
    /// `Download`, `Update` or `Build`.
    pub status: BinaryStatus,
    /// Remote holding the binary.
    pub remote: Option<String>,
    /// Recipe, for builds.
    pub recipe: Option<Arc<dyn Recipe>>,
    /// Configuration to build.
    pub config: Configuration,
    /// Package references of the dependencies.
    pub requires: Vec<String>,
}

impl InstallTask {
    /// Identity guarded by the cache lock.
    pub fn lock_key(&self) -> String {
        format!("{}:{}", self.reference, self.pref.package_id)
    }

    fn from_node(graph: &DepsGraph, id: NodeId) -> Result<Option<Self>, InstallError> {
        let node = graph.node(id);
        if !node.binary.needs_action() {
            return Ok(None);
        }
        let label = node.label();
        let unavailable = |why: &str| InstallError::Unavailable(label.clone(), why.to_string());

        let reference = node.reference.clone().ok_or_else(|| unavailable("no reference"))?;
        let pref = match node.binary {
            BinaryStatus::Build => {
                let package_id = node
                    .package_id
                    .clone()
                    .filter(|p| !p.is_unknown())
                    .ok_or_else(|| unavailable("package id still unknown"))?;
                PkgReference::new(reference.clone(), package_id)
                    .map_err(|e| unavailable(&e.to_string()))?
            }
            _ => node.pref.clone().ok_or_else(|| unavailable("no binary located"))?,
        };
        let requires = node
            .dependencies
            .iter()
            .filter_map(|e| graph.node(e.dst).package_reference())
            .map(|p| p.to_string())
            .collect();

        Ok(Some(Self {
            node: id,
            reference,
            pref,
            status: node.binary,
            remote: node.binary_remote.clone(),
            recipe: node.recipe.clone(),
            config: node.config.clone(),
            requires,
        }))
    }
}

/// Performs downloads and builds for the executor.
#[async_trait::async_trait]
pub trait NodeInstaller: Send + Sync {
    /// Copy a binary from its remote into the cache.
    async fn download(&self, task: &InstallTask) -> Result<PkgReference, InstallError>;

    /// Build a binary from source into the cache.
    async fn build(&self, task: &InstallTask) -> Result<PkgReference, InstallError>;
}

/// Per-identity locks serializing cache writes.
#[derive(Debug, Clone, Default)]
pub struct CacheLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl CacheLocks {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock of one identity, created on first use.
    pub fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.to_string()).or_default().clone()
    }
}

/// What an install did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InstallSummary {
    /// Binaries downloaded or updated.
    pub downloaded: usize,
    /// Binaries built.
    pub built: usize,
    /// Wall time.
    pub elapsed_secs: f64,
}

impl InstallSummary {
    /// Tasks run.
    pub fn total(&self) -> usize {
        self.downloaded + self.built
    }
}

type TaskOutcome = (NodeId, String, BinaryStatus, Result<PkgReference, InstallError>);

/// Runs install tasks level by level.
pub struct Executor {
    jobs: usize,
    locks: CacheLocks,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("jobs", &self.jobs).finish_non_exhaustive()
    }
}

impl Executor {
    /// Executor with `jobs` concurrent tasks (at least one).
    pub fn new(jobs: usize, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            jobs: jobs.max(1),
            locks: CacheLocks::new(),
            reporter,
        }
    }

    /// Share a lock table with other executors writing the same cache.
    #[must_use]
    pub fn with_locks(mut self, locks: CacheLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Install every DOWNLOAD, UPDATE and BUILD node of `graph`.
    ///
    /// Package ids deferred until their dependencies were built are
    /// recomputed right before their level runs. Produced package
    /// references are written back to the nodes.
    ///
    /// # Errors
    ///
    /// [`ExecutionError`] with every failure of the first failing level.
    pub async fn run(
        &self,
        graph: &mut DepsGraph,
        installer: Arc<dyn NodeInstaller>,
        computer: &PackageIdComputer,
    ) -> Result<InstallSummary, ExecutionError> {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut summary = InstallSummary::default();

        for level in InstallOrder::new(graph).by_levels() {
            let mut failures = Vec::new();
            let mut tasks = Vec::new();
            for id in level {
                if let Err(e) = Self::refresh_package_id(graph, *id, computer) {
                    failures.push((graph.node(*id).label(), e));
                    continue;
                }
                match InstallTask::from_node(graph, *id) {
                    Ok(Some(task)) => tasks.push(task),
                    Ok(None) => {}
                    Err(e) => failures.push((graph.node(*id).label(), e.to_string())),
                }
            }
            if !failures.is_empty() {
                return Err(ExecutionError { failures });
            }
            if tasks.is_empty() {
                continue;
            }

            let mut set: JoinSet<TaskOutcome> = JoinSet::new();
            for task in tasks {
                let installer = installer.clone();
                let semaphore = semaphore.clone();
                let locks = self.locks.clone();
                let reporter = self.reporter.clone();

                set.spawn(async move {
                    let label = task.reference.to_string();
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        let err = InstallError::Join("worker pool closed".to_string());
                        return (task.node, label, task.status, Err(err));
                    };
                    let lock = locks.lock_for(&task.lock_key());
                    let _guard = lock.lock().await;

                    let result = match task.status {
                        BinaryStatus::Build => {
                            reporter.building(&label);
                            installer.build(&task).await
                        }
                        _ => {
                            reporter.downloading(&label, task.remote.as_deref().unwrap_or("?"));
                            installer.download(&task).await
                        }
                    };
                    (task.node, label, task.status, result)
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((id, label, status, Ok(pref))) => {
                        let action = if status == BinaryStatus::Build {
                            summary.built += 1;
                            "built"
                        } else {
                            summary.downloaded += 1;
                            "downloaded"
                        };
                        self.reporter.done(&label, action);
                        graph.node_mut(id).pref = Some(pref);
                    }
                    Ok((_, label, _, Err(e))) => {
                        self.reporter.failed(&label, &e.to_string());
                        failures.push((label, e.to_string()));
                    }
                    Err(e) => failures.push(("<task>".to_string(), e.to_string())),
                }
            }
            if !failures.is_empty() {
                return Err(ExecutionError { failures });
            }
        }

        summary.elapsed_secs = start.elapsed().as_secs_f64();
        if summary.total() > 0 {
            self.reporter
                .summary(summary.total(), "install", summary.elapsed_secs);
        }
        Ok(summary)
    }

    fn refresh_package_id(
        graph: &mut DepsGraph,
        id: NodeId,
        computer: &PackageIdComputer,
    ) -> Result<(), String> {
        let node = graph.node(id);
        if node.binary != BinaryStatus::Build
            || !node.package_id.as_ref().is_some_and(|p| p.is_unknown())
        {
            return Ok(());
        }
        let computed = computer.compute(graph, id).map_err(|e| e.to_string())?;
        if computed.package_id.is_unknown() {
            return Err("package id still depends on unbuilt packages".to_string());
        }
        tracing::debug!("{}: package id resolved to {}", node.label(), computed.package_id);
        let node = graph.node_mut(id);
        node.package_id = Some(computed.package_id);
        node.info = Some(computed.info);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_identity_shares_a_lock() {
        let locks = CacheLocks::new();
        let a = locks.lock_for("zlib/1.0#r:p");
        let b = locks.lock_for("zlib/1.0#r:p");
        let c = locks.lock_for("zlib/1.0#r:q");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let guard = a.lock().await;
        assert!(b.try_lock().is_err());
        assert!(c.try_lock().is_ok());
        drop(guard);
        assert!(b.try_lock().is_ok());
    }

    #[test]
    fn execution_error_lists_failures() {
        let err = ExecutionError {
            failures: vec![("a/1.0".into(), "boom".into()), ("b/1.0".into(), "bang".into())],
        };
        let text = err.to_string();
        assert!(text.starts_with("2 package(s) failed"));
        assert!(text.contains("  b/1.0: bang"));
    }
}
