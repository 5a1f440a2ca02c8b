//! [`NodeInstaller`] over package stores.

use crate::executor::{InstallError, InstallTask, NodeInstaller};
use crate::recipe::BuildContext;
use crate::store::{CacheStore, PackageMetadata, PackageStore};
use rivet_schema::{PkgReference, RevisionHash};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Downloads from remotes and builds through recipe hooks, storing the
/// results in the cache.
#[derive(Debug, Clone)]
pub struct StoreInstaller {
    cache: Arc<dyn CacheStore>,
    remotes: Vec<Arc<dyn PackageStore>>,
    build_root: PathBuf,
}

impl StoreInstaller {
    /// Installer writing into `cache`; builds run in temporary folders
    /// under `build_root`.
    pub fn new(
        cache: Arc<dyn CacheStore>,
        remotes: Vec<Arc<dyn PackageStore>>,
        build_root: PathBuf,
    ) -> Self {
        Self {
            cache,
            remotes,
            build_root,
        }
    }

    fn remote(&self, name: &str) -> Result<&Arc<dyn PackageStore>, InstallError> {
        self.remotes
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| InstallError::UnknownRemote(name.to_string()))
    }
}

/// Relative path and SHA-256 of every file under `root`, sorted by path.
pub fn hash_folder(root: &Path) -> Result<Vec<(String, String)>, std::io::Error> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(std::io::Error::other)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let content = std::fs::read(entry.path())?;
        files.push((relative, hex::encode(Sha256::digest(&content))));
    }
    Ok(files)
}

fn package_revision(files: &[(String, String)]) -> RevisionHash {
    let listing: String = files
        .iter()
        .map(|(path, hash)| format!("{path}:{hash}\n"))
        .collect();
    RevisionHash::compute(listing.as_bytes())
}

#[async_trait::async_trait]
impl NodeInstaller for StoreInstaller {
    async fn download(&self, task: &InstallTask) -> Result<PkgReference, InstallError> {
        let remote_name = task.remote.as_deref().ok_or_else(|| {
            InstallError::Unavailable(task.reference.to_string(), "no remote".to_string())
        })?;
        let remote = self.remote(remote_name)?;
        let metadata = remote
            .read_metadata(&task.pref)?
            .ok_or_else(|| InstallError::NotFound {
                pref: task.pref.to_string(),
                remote: remote_name.to_string(),
            })?;

        if self.cache.read_recipe(&task.reference)?.is_none() {
            if let Some(manifest) = remote.read_recipe(&task.reference)? {
                self.cache.write_recipe(&task.reference, &manifest)?;
            }
        }
        self.cache.write_package(&task.pref, &metadata)?;
        tracing::debug!("Downloaded {} from '{remote_name}'", task.pref);
        Ok(task.pref.clone())
    }

    async fn build(&self, task: &InstallTask) -> Result<PkgReference, InstallError> {
        let recipe = task.recipe.clone().ok_or_else(|| {
            InstallError::Unavailable(task.reference.to_string(), "no recipe".to_string())
        })?;

        let build_root = self.build_root.clone();
        let prefix = format!("{}-", task.reference.name);
        let reference = task.reference.clone();
        let config = task.config.clone();

        let files = tokio::task::spawn_blocking(move || -> Result<_, InstallError> {
            std::fs::create_dir_all(&build_root)?;
            let scratch = tempfile::Builder::new()
                .prefix(&prefix)
                .tempdir_in(&build_root)?;
            let ctx = BuildContext {
                reference,
                build_folder: scratch.path().join("build"),
                package_folder: scratch.path().join("package"),
                config,
            };
            recipe.build(&ctx)?;
            recipe.package(&ctx)?;
            Ok(hash_folder(&ctx.package_folder)?)
        })
        .await
        .map_err(|e| InstallError::Join(e.to_string()))??;

        let prev = package_revision(&files);
        let pref = task
            .pref
            .clone()
            .with_revision(prev.as_str(), Some(chrono::Utc::now().timestamp()));
        let metadata = PackageMetadata {
            config: task.config.clone(),
            requires: task.requires.clone(),
            manifest: files,
        };
        self.cache.write_package(&pref, &metadata)?;
        tracing::debug!("Built {pref}");
        Ok(pref)
    }
}
