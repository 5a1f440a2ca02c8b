//! Package id computation.
//!
//! A package id is the BLAKE3 hash of a canonical text dump of the
//! information that identifies one binary: the node's settings, its
//! options that affect the binary, and a rendering of each direct
//! dependency whose precision depends on a [`DependencyMode`].

use crate::graph::{DepsGraph, NodeId};
use crate::requirement::RequirementKind;
use rivet_schema::{PackageId, RecipeReference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A recipe's package id customization references something that does not exist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackageIdError {
    /// `remove_setting` on an absent setting.
    #[error("package_id() references unknown setting '{0}'")]
    UnknownSetting(String),

    /// `remove_option` on an absent option.
    #[error("package_id() references unknown option '{0}'")]
    UnknownOption(String),

    /// A mode was set for a requirement the recipe does not have.
    #[error("package_id() references unknown requirement '{0}'")]
    UnknownRequirement(String),

    /// Unparseable mode name.
    #[error("Unknown package id mode '{0}'")]
    UnknownMode(String),
}

/// How much of a dependency's identity enters the consumer's package id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DependencyMode {
    /// Ignore the dependency.
    #[serde(rename = "unrelated_mode")]
    Unrelated,
    /// `name/1.Y.Z` for 1.0 and later, full version before 1.0.
    #[default]
    #[serde(rename = "semver_mode")]
    Semver,
    /// `name/1.Y.Z`.
    #[serde(rename = "major_mode")]
    Major,
    /// `name/1.2.Z`.
    #[serde(rename = "minor_mode")]
    Minor,
    /// `name/1.2.3`.
    #[serde(rename = "patch_mode")]
    Patch,
    /// The full version string with user and channel.
    #[serde(rename = "full_version_mode")]
    FullVersion,
    /// Full version plus recipe revision.
    #[serde(rename = "recipe_revision_mode")]
    RecipeRevision,
    /// Recipe revision plus the dependency's package id.
    #[serde(rename = "full_package_mode")]
    FullPackage,
    /// Package id plus the dependency's package revision.
    #[serde(rename = "package_revision_mode")]
    PackageRevision,
}

impl DependencyMode {
    /// Config/CLI name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unrelated => "unrelated_mode",
            Self::Semver => "semver_mode",
            Self::Major => "major_mode",
            Self::Minor => "minor_mode",
            Self::Patch => "patch_mode",
            Self::FullVersion => "full_version_mode",
            Self::RecipeRevision => "recipe_revision_mode",
            Self::FullPackage => "full_package_mode",
            Self::PackageRevision => "package_revision_mode",
        }
    }
}

impl fmt::Display for DependencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyMode {
    type Err = PackageIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s {
            "unrelated_mode" => Self::Unrelated,
            "semver_mode" => Self::Semver,
            "major_mode" => Self::Major,
            "minor_mode" => Self::Minor,
            "patch_mode" => Self::Patch,
            "full_version_mode" => Self::FullVersion,
            "recipe_revision_mode" => Self::RecipeRevision,
            "full_package_mode" => Self::FullPackage,
            "package_revision_mode" => Self::PackageRevision,
            other => return Err(PackageIdError::UnknownMode(other.to_string())),
        };
        Ok(mode)
    }
}

/// Identity of one dependency as seen by the consumer's package id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequirementInfo {
    /// Dependency reference (with recipe revision once resolved).
    pub reference: RecipeReference,
    /// Dependency package id, if computed.
    pub package_id: Option<PackageId>,
    /// Dependency package revision, if the binary exists.
    pub prev: Option<String>,
    /// Rendering precision.
    pub mode: DependencyMode,
}

impl RequirementInfo {
    /// Text rendering, `None` when the mode ignores the dependency.
    ///
    /// `Some(Err(()))` means the rendering needs a package id or package
    /// revision that does not exist yet.
    fn render(&self) -> Option<Result<String, ()>> {
        let r = &self.reference;
        let base = |version: String| format!("{}/{}{}", r.name, version, user_channel(r));
        let full = base(r.version.to_string());
        let with_rrev = match &r.revision {
            Some(rev) => format!("{full}#{rev}"),
            None => full.clone(),
        };
        let line = match self.mode {
            DependencyMode::Unrelated => return None,
            DependencyMode::Semver => match r.version.semver() {
                Some(v) if v.major >= 1 => base(format!("{}.Y.Z", v.major)),
                _ => full,
            },
            DependencyMode::Major => base(format!("{}.Y.Z", component(r, 0))),
            DependencyMode::Minor => base(format!("{}.{}.Z", component(r, 0), component(r, 1))),
            DependencyMode::Patch => base(format!(
                "{}.{}.{}",
                component(r, 0),
                component(r, 1),
                component(r, 2)
            )),
            DependencyMode::FullVersion => full,
            DependencyMode::RecipeRevision => with_rrev,
            DependencyMode::FullPackage => match &self.package_id {
                Some(pid) if !pid.is_unknown() => format!("{with_rrev}:{pid}"),
                _ => return Some(Err(())),
            },
            DependencyMode::PackageRevision => match (&self.package_id, &self.prev) {
                (Some(pid), Some(prev)) if !pid.is_unknown() => format!("{with_rrev}:{pid}#{prev}"),
                _ => return Some(Err(())),
            },
        };
        Some(Ok(line))
    }
}

fn component(r: &RecipeReference, index: usize) -> String {
    r.version
        .components()
        .get(index)
        .map_or_else(|| "0".to_string(), ToString::to_string)
}

fn user_channel(r: &RecipeReference) -> String {
    match (&r.user, &r.channel) {
        (Some(u), Some(c)) => format!("@{u}/{c}"),
        (Some(u), None) => format!("@{u}"),
        _ => String::new(),
    }
}

/// Everything that enters a package id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageInfo {
    /// Effective settings.
    pub settings: BTreeMap<String, String>,
    /// Options that affect the binary.
    pub options: BTreeMap<String, String>,
    /// Host dependencies by name.
    pub requires: BTreeMap<String, RequirementInfo>,
    /// Tool dependencies by name (only with a build mode configured).
    pub build_requires: BTreeMap<String, RequirementInfo>,
}

impl PackageInfo {
    /// Drop a setting from the identity.
    ///
    /// # Errors
    ///
    /// [`PackageIdError::UnknownSetting`] when the setting is absent.
    pub fn remove_setting(&mut self, name: &str) -> Result<(), PackageIdError> {
        self.settings
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| PackageIdError::UnknownSetting(name.to_string()))
    }

    /// Drop an option from the identity.
    ///
    /// # Errors
    ///
    /// [`PackageIdError::UnknownOption`] when the option is absent.
    pub fn remove_option(&mut self, name: &str) -> Result<(), PackageIdError> {
        self.options
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| PackageIdError::UnknownOption(name.to_string()))
    }

    /// Change the mode of one dependency.
    ///
    /// # Errors
    ///
    /// [`PackageIdError::UnknownRequirement`] when no dependency has that name.
    pub fn set_requirement_mode(
        &mut self,
        name: &str,
        mode: DependencyMode,
    ) -> Result<(), PackageIdError> {
        let mut found = false;
        for info in self
            .requires
            .values_mut()
            .chain(self.build_requires.values_mut())
            .filter(|info| info.reference.name == name)
        {
            info.mode = mode;
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(PackageIdError::UnknownRequirement(name.to_string()))
        }
    }

    /// Header-only packages: one binary for every configuration.
    pub fn clear(&mut self) {
        self.settings.clear();
        self.options.clear();
        self.requires.clear();
        self.build_requires.clear();
    }

    fn render_section(
        out: &mut String,
        title: &str,
        deps: &BTreeMap<String, RequirementInfo>,
    ) -> Result<(), ()> {
        let mut lines = Vec::new();
        for info in deps.values() {
            if let Some(line) = info.render() {
                lines.push(line?);
            }
        }
        if !lines.is_empty() {
            lines.sort();
            out.push_str(&format!("[{title}]\n"));
            for line in lines {
                out.push_str(&line);
                out.push('\n');
            }
        }
        Ok(())
    }

    /// Canonical text dump. `None` while a dependency identity is deferred.
    pub fn dumps(&self) -> Option<String> {
        let mut out = String::new();
        for (title, map) in [("settings", &self.settings), ("options", &self.options)] {
            if !map.is_empty() {
                out.push_str(&format!("[{title}]\n"));
                for (k, v) in map {
                    out.push_str(&format!("{k}={v}\n"));
                }
            }
        }
        Self::render_section(&mut out, "requires", &self.requires).ok()?;
        Self::render_section(&mut out, "build_requires", &self.build_requires).ok()?;
        Some(out)
    }

    /// Package id of this info, `unknown` while deferred.
    pub fn package_id(&self) -> PackageId {
        match self.dumps() {
            Some(dump) => PackageId::compute(dump.as_bytes()),
            None => PackageId::unknown(),
        }
    }

    /// Apply a compatibility overlay.
    fn overlay(&self, settings: &BTreeMap<String, String>, options: &BTreeMap<String, String>) -> Self {
        let mut info = self.clone();
        for (k, v) in settings {
            info.settings.insert(k.clone(), v.clone());
        }
        for (k, v) in options {
            info.options.insert(k.clone(), v.clone());
        }
        info
    }
}

/// Result of computing one node's identity.
#[derive(Debug, Clone)]
pub struct ComputedId {
    /// Primary package id.
    pub package_id: PackageId,
    /// Info it was computed from.
    pub info: PackageInfo,
    /// Compatible fallbacks in priority order.
    pub compatible: Vec<PackageId>,
}

/// Computes package ids from graph nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageIdComputer {
    /// Mode for regular requirements without an explicit one.
    pub default_mode: DependencyMode,
    /// Mode for tool requirements; `None` keeps them out of the id.
    pub build_mode: Option<DependencyMode>,
}

impl PackageIdComputer {
    /// Computer with explicit modes.
    pub fn new(default_mode: DependencyMode, build_mode: Option<DependencyMode>) -> Self {
        Self {
            default_mode,
            build_mode,
        }
    }

    /// Build the identity info of a node from its configuration and its
    /// direct dependencies, then let the recipe customize it.
    ///
    /// Dependencies must already carry their own package ids.
    ///
    /// # Errors
    ///
    /// Propagates [`PackageIdError`] raised by the recipe customization.
    pub fn compute(&self, graph: &DepsGraph, id: NodeId) -> Result<ComputedId, PackageIdError> {
        let node = graph.node(id);
        let declared = node
            .recipe
            .as_ref()
            .map(|r| r.options())
            .unwrap_or_default();

        let mut info = PackageInfo {
            settings: node.config.settings.clone(),
            options: node
                .config
                .options
                .iter()
                .filter(|(name, _)| declared.get(*name).is_none_or(|d| d.affects_package_id))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            ..PackageInfo::default()
        };

        for edge in &node.dependencies {
            let dep = graph.node(edge.dst);
            let Some(reference) = &dep.reference else {
                continue;
            };
            let (target, mode) = match edge.requirement.kind {
                RequirementKind::Test => continue,
                RequirementKind::Tool => match self.build_mode {
                    Some(mode) => (&mut info.build_requires, edge.requirement.package_id_mode.unwrap_or(mode)),
                    None => continue,
                },
                RequirementKind::Regular => (
                    &mut info.requires,
                    edge.requirement.package_id_mode.unwrap_or(self.default_mode),
                ),
            };
            target.insert(
                reference.key().to_string(),
                RequirementInfo {
                    reference: reference.clone(),
                    package_id: dep.package_id.clone(),
                    prev: dep.pref.as_ref().and_then(|p| p.revision.clone()),
                    mode,
                },
            );
        }

        if let Some(recipe) = &node.recipe {
            recipe.package_id(&mut info)?;
        }
        let package_id = info.package_id();

        let mut compatible = Vec::new();
        if let (false, Some(recipe)) = (package_id.is_unknown(), &node.recipe) {
            for overlay in recipe.compatibility(&node.config) {
                let candidate = info.overlay(&overlay.settings, &overlay.options).package_id();
                if candidate != package_id && !compatible.contains(&candidate) {
                    compatible.push(candidate);
                }
            }
        }

        Ok(ComputedId {
            package_id,
            info,
            compatible,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(reference: &str, mode: DependencyMode) -> RequirementInfo {
        RequirementInfo {
            reference: RecipeReference::parse(reference).unwrap(),
            package_id: Some(PackageId::new("abc")),
            prev: None,
            mode,
        }
    }

    fn info_with(dep_info: RequirementInfo) -> PackageInfo {
        let mut info = PackageInfo::default();
        info.settings.insert("os".into(), "Linux".into());
        info.requires.insert(dep_info.reference.name.clone(), dep_info);
        info
    }

    #[test]
    fn renders_each_mode() {
        let cases = [
            (DependencyMode::Semver, "zlib/1.Y.Z"),
            (DependencyMode::Major, "zlib/1.Y.Z"),
            (DependencyMode::Minor, "zlib/1.2.Z"),
            (DependencyMode::Patch, "zlib/1.2.3"),
            (DependencyMode::FullVersion, "zlib/1.2.3"),
            (DependencyMode::RecipeRevision, "zlib/1.2.3#r1"),
            (DependencyMode::FullPackage, "zlib/1.2.3#r1:abc"),
        ];
        for (mode, expected) in cases {
            let line = dep("zlib/1.2.3#r1", mode).render().unwrap().unwrap();
            assert_eq!(line, expected, "{mode}");
        }
        assert!(dep("zlib/1.2.3", DependencyMode::Unrelated).render().is_none());
    }

    #[test]
    fn semver_mode_keeps_zero_major_versions() {
        let line = dep("zlib/0.3.1", DependencyMode::Semver).render().unwrap().unwrap();
        assert_eq!(line, "zlib/0.3.1");
    }

    #[test]
    fn short_versions_pad_components() {
        let line = dep("zlib/2", DependencyMode::Patch).render().unwrap().unwrap();
        assert_eq!(line, "zlib/2.0.0");
    }

    #[test]
    fn package_revision_mode_defers_without_prev() {
        let info = info_with(dep("zlib/1.0#r1", DependencyMode::PackageRevision));
        assert!(info.dumps().is_none());
        assert!(info.package_id().is_unknown());

        let mut with_prev = dep("zlib/1.0#r1", DependencyMode::PackageRevision);
        with_prev.prev = Some("p1".into());
        assert!(!info_with(with_prev).package_id().is_unknown());
    }

    #[test]
    fn dump_is_canonical() {
        let info = info_with(dep("zlib/1.2.3#r1", DependencyMode::Minor));
        assert_eq!(info.dumps().unwrap(), "[settings]\nos=Linux\n[requires]\nzlib/1.2.Z\n");
    }

    #[test]
    fn minor_changes_do_not_change_semver_id() {
        let a = info_with(dep("zlib/1.2.3", DependencyMode::Semver)).package_id();
        let b = info_with(dep("zlib/1.3.0", DependencyMode::Semver)).package_id();
        let c = info_with(dep("zlib/2.0.0", DependencyMode::Semver)).package_id();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn customization_errors() {
        let mut info = info_with(dep("zlib/1.0", DependencyMode::Semver));
        assert_eq!(
            info.remove_setting("compiler"),
            Err(PackageIdError::UnknownSetting("compiler".into()))
        );
        assert!(info.remove_setting("os").is_ok());
        assert!(info.remove_option("shared").is_err());
        assert!(info.set_requirement_mode("openssl", DependencyMode::Major).is_err());
        assert!(info.set_requirement_mode("zlib", DependencyMode::Major).is_ok());
    }

    #[test]
    fn mode_names_parse() {
        assert_eq!("minor_mode".parse::<DependencyMode>().unwrap(), DependencyMode::Minor);
        assert!("bogus".parse::<DependencyMode>().is_err());
        let json = serde_json::to_string(&DependencyMode::PackageRevision).unwrap();
        assert_eq!(json, "\"package_revision_mode\"");
    }
}
