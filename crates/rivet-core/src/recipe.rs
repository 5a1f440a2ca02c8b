//! Recipe capability interface.
//!
//! The engine never runs user build logic itself. It sees a recipe only
//! through the [`Recipe`] trait: declared settings and options, the
//! requirements for a given configuration, validation, package id
//! customization, and the opaque `build()`/`package()` hooks.
//!
//! [`DeclaredRecipe`] is the native implementation backed by a serde
//! [`RecipeManifest`], which is also the content stored in package stores.

use crate::package_id::{DependencyMode, PackageIdError, PackageInfo};
use crate::requirement::{Requirement, RequirementKind};
use rivet_schema::{RecipeReference, RevisionHash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Recipe loading and hook failures.
#[derive(Error, Debug)]
pub enum RecipeError {
    /// The manifest is not usable.
    #[error("Invalid recipe '{reference}': {reason}")]
    Invalid {
        /// Recipe involved.
        reference: String,
        /// What is wrong.
        reason: String,
    },

    /// A build or package hook failed.
    #[error("Recipe hook '{hook}' failed for '{reference}': {message}")]
    Hook {
        /// Recipe involved.
        reference: String,
        /// `build` or `package`.
        hook: &'static str,
        /// Failure description.
        message: String,
    },

    /// Filesystem error inside a hook.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// `validate()` rejected the configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct InvalidConfiguration(pub String);

fn default_true() -> bool {
    true
}

/// A declared option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDecl {
    /// Value when nothing else sets it.
    pub default: String,
    /// Whether the value enters the package id.
    #[serde(default = "default_true")]
    pub affects_package_id: bool,
}

impl OptionDecl {
    /// Option affecting the package id.
    pub fn new(default: &str) -> Self {
        Self {
            default: default.to_string(),
            affects_package_id: true,
        }
    }
}

/// Effective configuration of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Settings (os, arch, `build_type`, ...).
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Option values.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Configuration {
    /// Option value, then setting value, for `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.options
            .get(name)
            .or_else(|| self.settings.get(name))
            .map(String::as_str)
    }

    /// Whether every `name = value` condition holds.
    pub fn satisfies(&self, conditions: &BTreeMap<String, String>) -> bool {
        conditions
            .iter()
            .all(|(name, value)| self.value(name) == Some(value.as_str()))
    }
}

/// A compatible fallback configuration (overlay on the primary info).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibleConfig {
    /// Settings replaced in the overlay.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Options replaced in the overlay.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Folders handed to `build()` and `package()`.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Reference being built.
    pub reference: RecipeReference,
    /// Scratch build folder.
    pub build_folder: PathBuf,
    /// Folder whose content becomes the package.
    pub package_folder: PathBuf,
    /// Configuration being built.
    pub config: Configuration,
}

/// The capability interface of a recipe.
pub trait Recipe: Send + Sync + Debug {
    /// Recipe name.
    fn name(&self) -> &str;

    /// Recipe version.
    fn version(&self) -> &str;

    /// Names of the settings the binary depends on.
    fn settings(&self) -> Vec<String>;

    /// Declared options.
    fn options(&self) -> BTreeMap<String, OptionDecl>;

    /// Adjust the configuration (e.g. drop settings).
    fn configure(&self, _config: &mut Configuration) {}

    /// Requirements for a configuration.
    fn requirements(&self, config: &Configuration) -> Vec<Requirement>;

    /// Reject configurations the recipe cannot be used with.
    fn validate(&self, _config: &Configuration) -> Result<(), InvalidConfiguration> {
        Ok(())
    }

    /// Reject configurations the recipe cannot be built with.
    fn validate_build(&self, _config: &Configuration) -> Result<(), InvalidConfiguration> {
        Ok(())
    }

    /// Customize the identity info.
    fn package_id(&self, _info: &mut PackageInfo) -> Result<(), PackageIdError> {
        Ok(())
    }

    /// Fallback configurations whose binaries are also acceptable, in priority order.
    fn compatibility(&self, _config: &Configuration) -> Vec<CompatibleConfig> {
        Vec::new()
    }

    /// Build from source.
    fn build(&self, ctx: &BuildContext) -> Result<(), RecipeError>;

    /// Copy artifacts into the package folder.
    fn package(&self, ctx: &BuildContext) -> Result<(), RecipeError>;
}

/// Requirement declaration in a manifest: a bare reference or a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequireSpec {
    /// `"zlib/[>=1.2]"`
    Plain(String),
    /// `{ ref = "...", private = true, ... }`
    Detailed {
        /// Reference, version may be a range.
        #[serde(rename = "ref")]
        reference: String,
        /// Private edge.
        #[serde(default)]
        private: bool,
        /// Override instead of dependency.
        #[serde(default, rename = "override")]
        is_override: bool,
        /// Options set on the dependency.
        #[serde(default)]
        options: BTreeMap<String, String>,
        /// Only declared when these `name = value` conditions hold.
        #[serde(default)]
        when: BTreeMap<String, String>,
        /// Package id mode for this edge.
        #[serde(default)]
        package_id_mode: Option<DependencyMode>,
    },
}

/// Declarative package id customization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdDecl {
    /// Settings excluded from the id.
    #[serde(default)]
    pub remove_settings: Vec<String>,
    /// Options excluded from the id.
    #[serde(default)]
    pub remove_options: Vec<String>,
    /// Per-dependency modes by dependency name.
    #[serde(default)]
    pub modes: BTreeMap<String, DependencyMode>,
}

/// A configuration the recipe rejects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidRule {
    /// Conditions that select the rejected configuration.
    pub when: BTreeMap<String, String>,
    /// Message shown to the user.
    pub reason: String,
    /// Only building is impossible; existing binaries stay usable.
    #[serde(default)]
    pub build_only: bool,
}

/// Stored recipe content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeManifest {
    /// Recipe name.
    pub name: String,
    /// Recipe version.
    pub version: String,
    /// Settings the binary depends on.
    #[serde(default)]
    pub settings: Vec<String>,
    /// Declared options.
    #[serde(default)]
    pub options: BTreeMap<String, OptionDecl>,
    /// Regular requirements.
    #[serde(default)]
    pub requires: Vec<RequireSpec>,
    /// Tool requirements.
    #[serde(default)]
    pub tool_requires: Vec<RequireSpec>,
    /// Test requirements.
    #[serde(default)]
    pub test_requires: Vec<RequireSpec>,
    /// One binary for every configuration.
    #[serde(default)]
    pub header_only: bool,
    /// Package id customization.
    #[serde(default)]
    pub package_id: PackageIdDecl,
    /// Compatible fallbacks in priority order.
    #[serde(default)]
    pub compatibility: Vec<CompatibleConfig>,
    /// Rejected configurations.
    #[serde(default)]
    pub invalid: Vec<InvalidRule>,
    /// Files written into the package folder by `package()`.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl RecipeManifest {
    /// Minimal manifest.
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            settings: Vec::new(),
            options: BTreeMap::new(),
            requires: Vec::new(),
            tool_requires: Vec::new(),
            test_requires: Vec::new(),
            header_only: false,
            package_id: PackageIdDecl::default(),
            compatibility: Vec::new(),
            invalid: Vec::new(),
            files: BTreeMap::new(),
        }
    }

    /// Add a regular requirement.
    pub fn requires(mut self, reference: &str) -> Self {
        self.requires.push(RequireSpec::Plain(reference.to_string()));
        self
    }

    /// Add a tool requirement.
    pub fn tool_requires(mut self, reference: &str) -> Self {
        self.tool_requires.push(RequireSpec::Plain(reference.to_string()));
        self
    }

    /// Add a test requirement.
    pub fn test_requires(mut self, reference: &str) -> Self {
        self.test_requires.push(RequireSpec::Plain(reference.to_string()));
        self
    }

    /// Add a detailed requirement.
    pub fn require_spec(mut self, spec: RequireSpec) -> Self {
        self.requires.push(spec);
        self
    }

    /// Declare settings.
    pub fn with_settings(mut self, settings: &[&str]) -> Self {
        self.settings = settings.iter().map(ToString::to_string).collect();
        self
    }

    /// Declare an option.
    pub fn with_option(mut self, name: &str, default: &str) -> Self {
        self.options.insert(name.to_string(), OptionDecl::new(default));
        self
    }

    /// Reference without revision.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }

    /// Content revision of this manifest.
    pub fn revision(&self) -> RevisionHash {
        let content = serde_json::to_vec(self).unwrap_or_default();
        RevisionHash::compute(&content)
    }
}

/// A requirement declaration after reference parsing.
#[derive(Debug, Clone)]
struct DeclaredRequirement {
    requirement: Requirement,
    when: BTreeMap<String, String>,
}

/// Native [`Recipe`] backed by a manifest.
#[derive(Debug, Clone)]
pub struct DeclaredRecipe {
    manifest: RecipeManifest,
    requirements: Vec<DeclaredRequirement>,
}

impl DeclaredRecipe {
    /// Validate a manifest and parse its requirement references.
    ///
    /// # Errors
    ///
    /// [`RecipeError::Invalid`] if a reference does not parse, or if a
    /// packaged file path would land outside the package folder.
    pub fn new(manifest: RecipeManifest) -> Result<Self, RecipeError> {
        let invalid = |reason: String| RecipeError::Invalid {
            reference: manifest.reference(),
            reason,
        };

        for path in manifest.files.keys() {
            if !is_contained(Path::new(path)) {
                return Err(invalid(format!(
                    "file '{path}' must be a relative path inside the package"
                )));
            }
        }

        let mut requirements = Vec::new();
        let groups = [
            (RequirementKind::Regular, &manifest.requires),
            (RequirementKind::Tool, &manifest.tool_requires),
            (RequirementKind::Test, &manifest.test_requires),
        ];
        for (kind, specs) in groups {
            for spec in specs {
                let (text, private, is_override, options, when, mode) = match spec {
                    RequireSpec::Plain(text) => (text, false, false, BTreeMap::new(), BTreeMap::new(), None),
                    RequireSpec::Detailed {
                        reference,
                        private,
                        is_override,
                        options,
                        when,
                        package_id_mode,
                    } => (
                        reference,
                        *private,
                        *is_override,
                        options.clone(),
                        when.clone(),
                        *package_id_mode,
                    ),
                };
                let reference =
                    RecipeReference::parse(text).map_err(|e| invalid(e.to_string()))?;
                if reference.name == manifest.name && !is_override {
                    return Err(invalid(format!("'{text}' requires itself")));
                }
                requirements.push(DeclaredRequirement {
                    requirement: Requirement {
                        reference,
                        kind,
                        private,
                        is_override,
                        direct: false,
                        options,
                        package_id_mode: mode,
                    },
                    when,
                });
            }
        }

        Ok(Self {
            manifest,
            requirements,
        })
    }

    /// The backing manifest.
    pub fn manifest(&self) -> &RecipeManifest {
        &self.manifest
    }

    fn hook_error(&self, hook: &'static str, err: &std::io::Error) -> RecipeError {
        RecipeError::Hook {
            reference: self.manifest.reference(),
            hook,
            message: err.to_string(),
        }
    }
}

impl Recipe for DeclaredRecipe {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn version(&self) -> &str {
        &self.manifest.version
    }

    fn settings(&self) -> Vec<String> {
        self.manifest.settings.clone()
    }

    fn options(&self) -> BTreeMap<String, OptionDecl> {
        self.manifest.options.clone()
    }

    fn configure(&self, config: &mut Configuration) {
        if self.manifest.header_only {
            config.settings.clear();
        }
    }

    fn requirements(&self, config: &Configuration) -> Vec<Requirement> {
        self.requirements
            .iter()
            .filter(|d| config.satisfies(&d.when))
            .map(|d| d.requirement.clone())
            .collect()
    }

    fn validate(&self, config: &Configuration) -> Result<(), InvalidConfiguration> {
        match self
            .manifest
            .invalid
            .iter()
            .find(|rule| !rule.build_only && config.satisfies(&rule.when))
        {
            Some(rule) => Err(InvalidConfiguration(rule.reason.clone())),
            None => Ok(()),
        }
    }

    fn validate_build(&self, config: &Configuration) -> Result<(), InvalidConfiguration> {
        match self
            .manifest
            .invalid
            .iter()
            .find(|rule| rule.build_only && config.satisfies(&rule.when))
        {
            Some(rule) => Err(InvalidConfiguration(rule.reason.clone())),
            None => Ok(()),
        }
    }

    fn package_id(&self, info: &mut PackageInfo) -> Result<(), PackageIdError> {
        if self.manifest.header_only {
            info.clear();
            return Ok(());
        }
        let decl = &self.manifest.package_id;
        for setting in &decl.remove_settings {
            info.remove_setting(setting)?;
        }
        for option in &decl.remove_options {
            info.remove_option(option)?;
        }
        for (name, mode) in &decl.modes {
            info.set_requirement_mode(name, *mode)?;
        }
        Ok(())
    }

    fn compatibility(&self, _config: &Configuration) -> Vec<CompatibleConfig> {
        self.manifest.compatibility.clone()
    }

    fn build(&self, ctx: &BuildContext) -> Result<(), RecipeError> {
        std::fs::create_dir_all(&ctx.build_folder).map_err(|e| self.hook_error("build", &e))?;
        let summary = serde_json::to_string_pretty(&ctx.config).unwrap_or_default();
        std::fs::write(ctx.build_folder.join("build_config.json"), summary)
            .map_err(|e| self.hook_error("build", &e))?;
        Ok(())
    }

    fn package(&self, ctx: &BuildContext) -> Result<(), RecipeError> {
        std::fs::create_dir_all(&ctx.package_folder)
            .map_err(|e| self.hook_error("package", &e))?;
        for (path, content) in &self.manifest.files {
            let target = ctx.package_folder.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| self.hook_error("package", &e))?;
            }
            std::fs::write(&target, content).map_err(|e| self.hook_error("package", &e))?;
        }
        Ok(())
    }
}

/// Relative, non-empty, and free of `..`, root and prefix components.
fn is_contained(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Turns stored manifests into executable recipes.
pub trait RecipeLoader: Send + Sync + Debug {
    /// Load a recipe.
    ///
    /// # Errors
    ///
    /// [`RecipeError`] when the manifest cannot be turned into a recipe.
    fn load(&self, manifest: RecipeManifest) -> Result<Arc<dyn Recipe>, RecipeError>;
}

/// Loads every manifest as a [`DeclaredRecipe`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclarativeLoader;

impl RecipeLoader for DeclarativeLoader {
    fn load(&self, manifest: RecipeManifest) -> Result<Arc<dyn Recipe>, RecipeError> {
        Ok(Arc::new(DeclaredRecipe::new(manifest)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Configuration {
        Configuration {
            settings: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            options: BTreeMap::new(),
        }
    }

    #[test]
    fn conditional_requirements() {
        let manifest = RecipeManifest::new("app", "1.0")
            .requires("zlib/1.0")
            .require_spec(RequireSpec::Detailed {
                reference: "winapi/1.0".into(),
                private: false,
                is_override: false,
                options: BTreeMap::new(),
                when: BTreeMap::from([("os".to_string(), "Windows".to_string())]),
                package_id_mode: None,
            });
        let recipe = DeclaredRecipe::new(manifest).unwrap();

        let linux = recipe.requirements(&config(&[("os", "Linux")]));
        assert_eq!(linux.len(), 1);
        let windows = recipe.requirements(&config(&[("os", "Windows")]));
        assert_eq!(windows.len(), 2);
    }

    #[test]
    fn rejects_bad_references() {
        let manifest = RecipeManifest::new("app", "1.0").requires("not a ref");
        assert!(matches!(
            DeclaredRecipe::new(manifest),
            Err(RecipeError::Invalid { .. })
        ));
        let manifest = RecipeManifest::new("app", "1.0").requires("app/2.0");
        assert!(DeclaredRecipe::new(manifest).is_err());
    }

    #[test]
    fn invalid_rules() {
        let mut manifest = RecipeManifest::new("lib", "1.0").with_settings(&["os"]);
        manifest.invalid.push(InvalidRule {
            when: BTreeMap::from([("os".to_string(), "Windows".to_string())]),
            reason: "Windows not supported".into(),
            build_only: false,
        });
        manifest.invalid.push(InvalidRule {
            when: BTreeMap::from([("os".to_string(), "Macos".to_string())]),
            reason: "cannot build on Macos".into(),
            build_only: true,
        });
        let recipe = DeclaredRecipe::new(manifest).unwrap();
        assert!(recipe.validate(&config(&[("os", "Linux")])).is_ok());
        assert_eq!(
            recipe.validate(&config(&[("os", "Windows")])),
            Err(InvalidConfiguration("Windows not supported".into()))
        );
        assert!(recipe.validate(&config(&[("os", "Macos")])).is_ok());
        assert!(recipe.validate_build(&config(&[("os", "Macos")])).is_err());
    }

    #[test]
    fn header_only_clears_identity() {
        let mut manifest = RecipeManifest::new("hdr", "1.0").with_settings(&["os"]);
        manifest.header_only = true;
        let recipe = DeclaredRecipe::new(manifest).unwrap();

        let mut cfg = config(&[("os", "Linux")]);
        recipe.configure(&mut cfg);
        assert!(cfg.settings.is_empty());

        let mut info = PackageInfo::default();
        info.settings.insert("os".into(), "Linux".into());
        recipe.package_id(&mut info).unwrap();
        assert_eq!(info, PackageInfo::default());
    }

    #[test]
    fn manifest_from_json_with_mixed_requires() {
        let json = r#"{
            "name": "app", "version": "1.0",
            "requires": ["zlib/[>=1.0]", {"ref": "ssl/1.0", "private": true}],
            "options": {"shared": {"default": "False"}}
        }"#;
        let manifest: RecipeManifest = serde_json::from_str(json).unwrap();
        assert!(manifest.options["shared"].affects_package_id);
        let recipe = DeclaredRecipe::new(manifest).unwrap();
        let reqs = recipe.requirements(&Configuration::default());
        assert_eq!(reqs.len(), 2);
        assert!(reqs[1].private);
    }

    #[test]
    fn package_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = RecipeManifest::new("lib", "1.0");
        manifest.files.insert("include/lib.h".into(), "#pragma once\n".into());
        let recipe = DeclaredRecipe::new(manifest).unwrap();
        let ctx = BuildContext {
            reference: RecipeReference::parse("lib/1.0").unwrap(),
            build_folder: dir.path().join("build"),
            package_folder: dir.path().join("package"),
            config: Configuration::default(),
        };
        recipe.build(&ctx).unwrap();
        recipe.package(&ctx).unwrap();
        assert!(dir.path().join("package/include/lib.h").exists());
    }

    #[test]
    fn rejects_files_outside_the_package() {
        for path in ["../escaped.txt", "include/../../escaped.txt", "/etc/escaped.txt", ""] {
            let mut manifest = RecipeManifest::new("lib", "1.0");
            manifest.files.insert(path.into(), "content".into());
            assert!(
                matches!(DeclaredRecipe::new(manifest), Err(RecipeError::Invalid { .. })),
                "{path}"
            );
        }
        let mut manifest = RecipeManifest::new("lib", "1.0");
        manifest.files.insert("./lib/./liblib.a".into(), "content".into());
        assert!(DeclaredRecipe::new(manifest).is_ok());
    }

    #[test]
    fn revision_tracks_content() {
        let a = RecipeManifest::new("lib", "1.0");
        let b = RecipeManifest::new("lib", "1.0").requires("zlib/1.0");
        assert_eq!(a.revision(), RecipeManifest::new("lib", "1.0").revision());
        assert_ne!(a.revision(), b.revision());
    }
}
