//! In-memory store, optionally persisted to a JSON file.
//!
//! Backs the local cache and file-based remotes of the CLI, and every
//! test fixture.

use super::{CacheStore, PackageMetadata, PackageStore, StoreError};
use crate::recipe::RecipeManifest;
use rivet_schema::{PackageId, PkgReference, RecipeReference, RevisionHash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredPackage {
    revision: String,
    timestamp: i64,
    metadata: PackageMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecipe {
    revision: String,
    timestamp: i64,
    manifest: RecipeManifest,
    #[serde(default)]
    packages: BTreeMap<String, Vec<StoredPackage>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    recipes: BTreeMap<String, Vec<StoredRecipe>>,
}

impl StoreData {
    fn recipe(&self, rref: &RecipeReference) -> Option<&StoredRecipe> {
        let revision = rref.revision.as_deref()?;
        self.recipes
            .get(&rref.without_revision().to_string())?
            .iter()
            .find(|r| r.revision == revision)
    }

    fn recipe_mut(&mut self, rref: &RecipeReference) -> Option<&mut StoredRecipe> {
        let revision = rref.revision.as_deref()?;
        self.recipes
            .get_mut(&rref.without_revision().to_string())?
            .iter_mut()
            .find(|r| r.revision == revision)
    }
}

/// A package store held in memory.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    path: Option<PathBuf>,
    data: RwLock<StoreData>,
}

impl MemoryStore {
    /// Empty store that is never persisted.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            data: RwLock::new(StoreData::default()),
        }
    }

    /// Open a store backed by a JSON file; a missing file is an empty store.
    /// Every write is saved back to the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(name: &str, path: &Path) -> Result<Self, StoreError> {
        let data = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
                store: name.to_string(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|source| StoreError::Json {
                store: name.to_string(),
                source,
            })?
        } else {
            StoreData::default()
        };
        Ok(Self {
            name: name.to_string(),
            path: Some(path.to_path_buf()),
            data: RwLock::new(data),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreData>, StoreError> {
        self.data
            .read()
            .map_err(|_| StoreError::Poisoned(self.name.clone()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreData>, StoreError> {
        self.data
            .write()
            .map_err(|_| StoreError::Poisoned(self.name.clone()))
    }

    fn persist(&self, data: &StoreData) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| StoreError::Io {
            store: self.name.clone(),
            source,
        };
        let content = serde_json::to_string_pretty(data).map_err(|source| StoreError::Json {
            store: self.name.clone(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).map_err(io_err)?;
        std::fs::rename(&temp_path, path).map_err(io_err)?;
        Ok(())
    }

    /// Apply `change` to a copy of the data and keep it only once it is saved.
    /// `change` returns false when there is nothing to write.
    fn update(
        &self,
        change: impl FnOnce(&mut StoreData) -> Result<bool, StoreError>,
    ) -> Result<(), StoreError> {
        let mut data = self.write()?;
        let mut next = data.clone();
        if change(&mut next)? {
            self.persist(&next)?;
            *data = next;
        }
        Ok(())
    }

    /// Export a recipe revision; the revision is the hash of the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is poisoned or cannot be persisted.
    pub fn add_recipe(
        &self,
        manifest: &RecipeManifest,
        timestamp: i64,
    ) -> Result<RecipeReference, StoreError> {
        let rref = RecipeReference::new(&manifest.name, &manifest.version)
            .with_revision(manifest.revision().as_str(), Some(timestamp));
        self.write_recipe(&rref, manifest)?;
        Ok(rref)
    }

    /// Add a binary; the package revision is the hash of the metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipe revision is unknown to this store.
    pub fn add_package(
        &self,
        rref: &RecipeReference,
        package_id: &PackageId,
        metadata: &PackageMetadata,
        timestamp: i64,
    ) -> Result<PkgReference, StoreError> {
        let content = serde_json::to_vec(metadata).map_err(|source| StoreError::Json {
            store: self.name.clone(),
            source,
        })?;
        let prev = RevisionHash::compute(&content);
        let pref = PkgReference {
            rref: rref.clone(),
            package_id: package_id.clone(),
            revision: Some(prev.into_string()),
            timestamp: Some(timestamp),
        };
        self.write_package(&pref, metadata)?;
        Ok(pref)
    }

    /// Every package reference in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is poisoned.
    pub fn packages(&self) -> Result<Vec<PkgReference>, StoreError> {
        let data = self.read()?;
        let mut out = Vec::new();
        for (key, recipes) in &data.recipes {
            let Ok(base) = RecipeReference::parse(key) else {
                continue;
            };
            for recipe in recipes {
                let rref = base.clone().with_revision(&recipe.revision, Some(recipe.timestamp));
                for (package_id, revisions) in &recipe.packages {
                    for package in revisions {
                        out.push(PkgReference {
                            rref: rref.clone(),
                            package_id: PackageId::new(package_id.as_str()),
                            revision: Some(package.revision.clone()),
                            timestamp: Some(package.timestamp),
                        });
                    }
                }
            }
        }
        Ok(out)
    }
}

impl PackageStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self, name: &str) -> Result<Vec<RecipeReference>, StoreError> {
        let data = self.read()?;
        Ok(data
            .recipes
            .keys()
            .filter_map(|key| RecipeReference::parse(key).ok())
            .filter(|rref| rref.name == name)
            .collect())
    }

    fn recipe_revisions(&self, rref: &RecipeReference) -> Result<Vec<RecipeReference>, StoreError> {
        let data = self.read()?;
        let base = rref.without_revision();
        let Some(recipes) = data.recipes.get(&base.to_string()) else {
            return Ok(Vec::new());
        };
        let mut revisions: Vec<&StoredRecipe> = recipes
            .iter()
            .filter(|r| rref.revision.as_ref().is_none_or(|rev| *rev == r.revision))
            .collect();
        revisions.sort_by(|a, b| (a.timestamp, &a.revision).cmp(&(b.timestamp, &b.revision)));
        Ok(revisions
            .into_iter()
            .map(|r| base.clone().with_revision(&r.revision, Some(r.timestamp)))
            .collect())
    }

    fn read_recipe(&self, rref: &RecipeReference) -> Result<Option<RecipeManifest>, StoreError> {
        Ok(self.read()?.recipe(rref).map(|r| r.manifest.clone()))
    }

    fn package_revisions(&self, pref: &PkgReference) -> Result<Vec<PkgReference>, StoreError> {
        let data = self.read()?;
        let Some(recipe) = data.recipe(&pref.rref) else {
            return Ok(Vec::new());
        };
        let Some(packages) = recipe.packages.get(pref.package_id.as_str()) else {
            return Ok(Vec::new());
        };
        let mut revisions: Vec<&StoredPackage> = packages
            .iter()
            .filter(|p| pref.revision.as_ref().is_none_or(|rev| *rev == p.revision))
            .collect();
        revisions.sort_by(|a, b| (a.timestamp, &a.revision).cmp(&(b.timestamp, &b.revision)));
        Ok(revisions
            .into_iter()
            .map(|p| PkgReference {
                rref: pref.rref.clone(),
                package_id: pref.package_id.clone(),
                revision: Some(p.revision.clone()),
                timestamp: Some(p.timestamp),
            })
            .collect())
    }

    fn read_metadata(&self, pref: &PkgReference) -> Result<Option<PackageMetadata>, StoreError> {
        let data = self.read()?;
        let Some(recipe) = data.recipe(&pref.rref) else {
            return Ok(None);
        };
        let Some(revision) = pref.revision.as_deref() else {
            return Ok(None);
        };
        Ok(recipe
            .packages
            .get(pref.package_id.as_str())
            .and_then(|revs| revs.iter().find(|p| p.revision == revision))
            .map(|p| p.metadata.clone()))
    }

    fn search(&self, pattern: &str) -> Result<Vec<RecipeReference>, StoreError> {
        let data = self.read()?;
        let mut found: Vec<RecipeReference> = data
            .recipes
            .keys()
            .filter_map(|key| RecipeReference::parse(key).ok())
            .filter(|rref| rref.matches(pattern, false))
            .collect();
        found.sort();
        Ok(found)
    }
}

impl CacheStore for MemoryStore {
    fn write_recipe(&self, rref: &RecipeReference, manifest: &RecipeManifest) -> Result<(), StoreError> {
        let Some(revision) = rref.revision.clone() else {
            return Err(StoreError::UnknownRecipe {
                store: self.name.clone(),
                reference: rref.to_string(),
            });
        };
        self.update(|data| {
            if data.recipe(rref).is_some() {
                return Ok(false);
            }
            tracing::debug!("Store '{}': adding recipe {rref}", self.name);
            data.recipes
                .entry(rref.without_revision().to_string())
                .or_default()
                .push(StoredRecipe {
                    revision,
                    timestamp: rref
                        .timestamp
                        .unwrap_or_else(|| chrono::Utc::now().timestamp()),
                    manifest: manifest.clone(),
                    packages: BTreeMap::new(),
                });
            Ok(true)
        })
    }

    fn write_package(&self, pref: &PkgReference, metadata: &PackageMetadata) -> Result<(), StoreError> {
        let unknown = || StoreError::UnknownRecipe {
            store: self.name.clone(),
            reference: pref.rref.to_string(),
        };
        let revision = pref.revision.clone().ok_or_else(unknown)?;
        self.update(|data| {
            let recipe = data.recipe_mut(&pref.rref).ok_or_else(unknown)?;
            let revisions = recipe
                .packages
                .entry(pref.package_id.to_string())
                .or_default();
            if revisions.iter().any(|p| p.revision == revision) {
                return Ok(false);
            }
            tracing::debug!("Store '{}': adding package {pref}", self.name);
            revisions.push(StoredPackage {
                revision,
                timestamp: pref
                    .timestamp
                    .unwrap_or_else(|| chrono::Utc::now().timestamp()),
                metadata: metadata.clone(),
            });
            Ok(true)
        })
    }
}
