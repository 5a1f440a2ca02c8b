//! Fixtures shared by the engine integration tests.
#![allow(dead_code)]

use rivet_core::Config;
use rivet_core::Session;
use rivet_core::builder::GraphRoot;
use rivet_core::recipe::{DeclaredRecipe, RecipeManifest};
use rivet_core::store::{MemoryStore, PackageMetadata, PackageStore};
use rivet_schema::{PackageId, PkgReference, RecipeReference};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tempfile::TempDir;

/// A cache, one remote and a configuration.
pub struct World {
    pub cache: Arc<MemoryStore>,
    pub remote: Arc<MemoryStore>,
    pub config: Config,
    clock: AtomicI64,
    builds: TempDir,
}

impl World {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(MemoryStore::new("cache")),
            remote: Arc::new(MemoryStore::new("central")),
            config: Config::default(),
            clock: AtomicI64::new(1_000),
            builds: TempDir::new().unwrap(),
        }
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(10, Ordering::SeqCst)
    }

    /// Export a recipe to the cache.
    pub fn export(&self, manifest: RecipeManifest) -> RecipeReference {
        self.cache.add_recipe(&manifest, self.tick()).unwrap()
    }

    /// Upload a recipe to the remote.
    pub fn publish(&self, manifest: RecipeManifest) -> RecipeReference {
        self.remote.add_recipe(&manifest, self.tick()).unwrap()
    }

    /// Store a binary in the cache.
    pub fn cache_binary(&self, rref: &RecipeReference, package_id: &PackageId) -> PkgReference {
        self.cache
            .add_package(rref, package_id, &PackageMetadata::default(), self.tick())
            .unwrap()
    }

    /// Store a binary in the remote.
    pub fn remote_binary(&self, rref: &RecipeReference, package_id: &PackageId) -> PkgReference {
        self.remote
            .add_package(rref, package_id, &PackageMetadata::default(), self.tick())
            .unwrap()
    }

    pub fn session(&self) -> Session {
        Session::new(self.config.clone(), self.cache.clone())
            .with_remote(self.remote.clone() as Arc<dyn PackageStore>)
            .with_build_root(self.builds.path().to_path_buf())
    }
}

pub fn r(s: &str) -> RecipeReference {
    RecipeReference::parse(s).unwrap()
}

pub fn requires(refs: &[&str]) -> GraphRoot {
    GraphRoot::Requires {
        requires: refs.iter().map(|s| r(s)).collect(),
        tool_requires: Vec::new(),
    }
}

pub fn consumer(manifest: RecipeManifest) -> GraphRoot {
    GraphRoot::Consumer(Arc::new(DeclaredRecipe::new(manifest).unwrap()))
}

pub fn policy(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
