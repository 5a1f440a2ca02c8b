//! User configuration (`~/.rivet/config.toml`).
//!
//! ```toml
//! jobs = 4
//! build_policy = ["missing"]
//! editables = ["mylib/1.0"]
//!
//! [host.settings]
//! os = "Linux"
//! build_type = "Release"
//!
//! [host.options]
//! "zlib/*:shared" = "True"
//!
//! [host]
//! platform_requires = ["openssl/3.0"]
//!
//! [resolver]
//! conflict_policy = "nearest"
//! default_package_id_mode = "semver_mode"
//!
//! [[remotes]]
//! name = "central"
//! path = "/srv/rivet/central.json"
//! ```

use crate::package_id::DependencyMode;
use rivet_schema::{Context, RecipeReference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Config path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("Invalid config {path}: {source}")]
    Parse {
        /// Config path.
        path: String,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },
}

/// How non-override version conflicts are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Closest to the root wins, then first declared.
    #[default]
    Nearest,
    /// Like `Nearest`, but unsatisfiable requirements at the same depth fail.
    Strict,
}

/// Settings and options of one context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Settings applied to every node of the context.
    pub settings: BTreeMap<String, String>,
    /// Options as `pattern:option = value`; a bare `option` applies to the root.
    pub options: BTreeMap<String, String>,
    /// References provided by the system instead of the graph.
    pub platform_requires: Vec<RecipeReference>,
}

impl Profile {
    /// Options that apply to `reference`.
    pub fn options_for(&self, reference: Option<&RecipeReference>, is_consumer: bool) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (key, value) in &self.options {
            let applies = match key.rsplit_once(':') {
                Some((pattern, option)) => reference
                    .is_some_and(|r| r.matches(pattern, is_consumer))
                    .then_some(option),
                None => is_consumer.then_some(key.as_str()),
            };
            if let Some(option) = applies {
                out.insert(option.to_string(), value.clone());
            }
        }
        out
    }

    /// The platform reference replacing `requirement`, if any.
    pub fn platform_for(&self, requirement: &RecipeReference) -> Option<&RecipeReference> {
        self.platform_requires.iter().find(|platform| {
            platform.key() == requirement.key()
                && match requirement.version_range() {
                    Some(Ok(range)) => range.contains(&platform.version),
                    Some(Err(_)) => false,
                    None => platform.version.value_eq(&requirement.version),
                }
        })
    }
}

/// Graph resolution settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Conflict precedence.
    pub conflict_policy: ConflictPolicy,
    /// Mode for regular requirements.
    pub default_package_id_mode: DependencyMode,
    /// Mode for tool requirements; unset keeps them out of package ids.
    pub build_package_id_mode: Option<DependencyMode>,
}

/// A remote store backed by a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Remote name.
    pub name: String,
    /// Store file.
    pub path: PathBuf,
}

/// Full configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host profile.
    pub host: Profile,
    /// Build profile.
    pub build: Profile,
    /// References used from editable folders.
    pub editables: Vec<RecipeReference>,
    /// Resolver settings.
    pub resolver: ResolverConfig,
    /// Default build policy.
    pub build_policy: Vec<String>,
    /// Remotes in priority order.
    pub remotes: Vec<RemoteConfig>,
    /// Parallel install jobs; 0 means one per CPU.
    pub jobs: usize,
}

impl Config {
    /// Load configuration from a file; a missing file gives the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse configuration text.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for invalid input.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Profile of a context.
    pub fn profile(&self, context: Context) -> &Profile {
        match context {
            Context::Host => &self.host,
            Context::Build => &self.build,
        }
    }

    /// Effective worker-pool size.
    pub fn jobs(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }

    /// Whether `reference` is registered as editable.
    pub fn editable_for(&self, reference: &RecipeReference) -> Option<&RecipeReference> {
        self.editables.iter().find(|e| {
            e.key() == reference.key()
                && match reference.version_range() {
                    Some(Ok(range)) => range.contains(&e.version),
                    Some(Err(_)) => false,
                    None => e.version.value_eq(&reference.version),
                }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
jobs = 2
build_policy = ["missing"]
editables = ["mylib/1.0"]

[host.settings]
os = "Linux"

[host.options]
"zlib/*:shared" = "True"
"fPIC" = "False"

[host]
platform_requires = ["openssl/3.0.2"]

[resolver]
conflict_policy = "strict"
build_package_id_mode = "minor_mode"

[[remotes]]
name = "central"
path = "/tmp/central.json"
"#;

    #[test]
    fn parses_full_config() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.jobs(), 2);
        assert_eq!(config.host.settings["os"], "Linux");
        assert_eq!(config.resolver.conflict_policy, ConflictPolicy::Strict);
        assert_eq!(config.resolver.default_package_id_mode, DependencyMode::Semver);
        assert_eq!(config.resolver.build_package_id_mode, Some(DependencyMode::Minor));
        assert_eq!(config.remotes[0].name, "central");
        assert!(config.build.settings.is_empty());
    }

    #[test]
    fn scoped_options() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let zlib = RecipeReference::parse("zlib/1.3").unwrap();
        let other = RecipeReference::parse("bzip2/1.0").unwrap();
        assert_eq!(config.host.options_for(Some(&zlib), false)["shared"], "True");
        assert!(config.host.options_for(Some(&other), false).is_empty());
        assert_eq!(config.host.options_for(None, true)["fPIC"], "False");
    }

    #[test]
    fn platform_and_editable_lookup() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let ranged = RecipeReference::parse("openssl/[>=3.0 <4]").unwrap();
        assert!(config.host.platform_for(&ranged).is_some());
        let old = RecipeReference::parse("openssl/[<3]").unwrap();
        assert!(config.host.platform_for(&old).is_none());
        assert!(config.build.platform_for(&ranged).is_none());

        let mylib = RecipeReference::parse("mylib/1.0").unwrap();
        assert!(config.editable_for(&mylib).is_some());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.jobs() >= 1);
    }
}
