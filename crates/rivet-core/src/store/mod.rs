//! Package store collaborators.
//!
//! The local cache and every remote expose the same read shape, keyed by
//! exact identity. The stores do no fuzzy matching; range resolution and
//! pattern matching happen in the engine before querying.

pub mod memory;

pub use memory::MemoryStore;

use crate::recipe::{Configuration, RecipeManifest};
use rivet_schema::{PkgReference, RecipeReference};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Store failures (not "not found", which is an empty result).
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem error.
    #[error("Store '{store}' I/O error: {source}")]
    Io {
        /// Store name.
        store: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Corrupt store data.
    #[error("Store '{store}' contains invalid data: {source}")]
    Json {
        /// Store name.
        store: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A writer panicked while holding the store lock.
    #[error("Store '{0}' lock poisoned")]
    Poisoned(String),

    /// A write referenced a recipe the store does not hold.
    #[error("Store '{store}' has no recipe '{reference}'")]
    UnknownRecipe {
        /// Store name.
        store: String,
        /// Missing reference.
        reference: String,
    },
}

/// Metadata stored with a binary package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Configuration the binary was built with.
    #[serde(default)]
    pub config: Configuration,
    /// Package references of the dependencies it was built against.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Files of the package folder with their content hashes.
    #[serde(default)]
    pub manifest: Vec<(String, String)>,
}

/// Read access shared by the cache and the remotes.
pub trait PackageStore: Send + Sync + Debug {
    /// Store name (remote name, or `cache`).
    fn name(&self) -> &str;

    /// All revision-less references with the given name.
    fn references(&self, name: &str) -> Result<Vec<RecipeReference>, StoreError>;

    /// Revisions of a recipe, oldest first, with timestamps.
    fn recipe_revisions(&self, rref: &RecipeReference) -> Result<Vec<RecipeReference>, StoreError>;

    /// Recipe content of one revision.
    fn read_recipe(&self, rref: &RecipeReference) -> Result<Option<RecipeManifest>, StoreError>;

    /// Package revisions of `(rref#rev, package_id)`, oldest first.
    fn package_revisions(&self, pref: &PkgReference) -> Result<Vec<PkgReference>, StoreError>;

    /// Metadata of one package revision.
    fn read_metadata(&self, pref: &PkgReference) -> Result<Option<PackageMetadata>, StoreError>;

    /// Recipe references matching a glob pattern.
    fn search(&self, pattern: &str) -> Result<Vec<RecipeReference>, StoreError>;

    /// Latest revision of a recipe.
    fn latest_recipe_revision(
        &self,
        rref: &RecipeReference,
    ) -> Result<Option<RecipeReference>, StoreError> {
        Ok(self.recipe_revisions(rref)?.into_iter().last())
    }

    /// Latest package revision of a binary.
    fn latest_package_revision(
        &self,
        pref: &PkgReference,
    ) -> Result<Option<PkgReference>, StoreError> {
        Ok(self.package_revisions(pref)?.into_iter().last())
    }
}

/// The local cache: a store that can also be written.
///
/// Concurrent writes of the same package reference must be serialized by
/// the caller (see [`crate::executor::CacheLocks`]).
pub trait CacheStore: PackageStore {
    /// Store a recipe revision.
    fn write_recipe(&self, rref: &RecipeReference, manifest: &RecipeManifest) -> Result<(), StoreError>;

    /// Store a package revision.
    fn write_package(&self, pref: &PkgReference, metadata: &PackageMetadata) -> Result<(), StoreError>;
}
