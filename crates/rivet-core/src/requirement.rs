//! Declared dependency edges.

use crate::package_id::DependencyMode;
use rivet_schema::{Context, RecipeReference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which kind of dependency a requirement declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequirementKind {
    /// Library linked into the consumer (`requires`).
    #[default]
    Regular,
    /// Tool run while building the consumer (`tool_requires`), resolved in the build context.
    Tool,
    /// Only used to build and test the consumer itself (`test_requires`).
    Test,
}

/// One declared dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Requested reference; the version may be a range.
    #[serde(rename = "ref")]
    pub reference: RecipeReference,
    /// Dependency kind.
    #[serde(default)]
    pub kind: RequirementKind,
    /// Do not expose the dependency (or its subtree) above the requirer.
    #[serde(default)]
    pub private: bool,
    /// Constrain the version of this identity elsewhere instead of adding a node.
    #[serde(default, rename = "override")]
    pub is_override: bool,
    /// Declared by the root of the graph.
    #[serde(default)]
    pub direct: bool,
    /// Options the requirer sets on the dependency.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// How much of the dependency enters the requirer's package id.
    #[serde(default)]
    pub package_id_mode: Option<DependencyMode>,
}

impl Requirement {
    /// A regular host requirement.
    pub fn new(reference: RecipeReference) -> Self {
        Self {
            reference,
            kind: RequirementKind::Regular,
            private: false,
            is_override: false,
            direct: false,
            options: BTreeMap::new(),
            package_id_mode: None,
        }
    }

    /// A tool requirement.
    pub fn tool(reference: RecipeReference) -> Self {
        Self {
            kind: RequirementKind::Tool,
            ..Self::new(reference)
        }
    }

    /// A test requirement.
    pub fn test(reference: RecipeReference) -> Self {
        Self {
            kind: RequirementKind::Test,
            ..Self::new(reference)
        }
    }

    /// An override of the version of `reference`'s identity.
    pub fn override_of(reference: RecipeReference) -> Self {
        Self {
            is_override: true,
            ..Self::new(reference)
        }
    }

    /// Mark as private.
    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    /// Mark as declared by the root.
    pub fn direct(mut self) -> Self {
        self.direct = true;
        self
    }

    /// Set an option on the dependency.
    pub fn with_option(mut self, name: &str, value: &str) -> Self {
        self.options.insert(name.to_string(), value.to_string());
        self
    }

    /// Set the package id mode of this edge.
    pub fn with_mode(mut self, mode: DependencyMode) -> Self {
        self.package_id_mode = Some(mode);
        self
    }

    /// Context of the dependency given the requirer's context.
    pub fn context(&self, parent: Context) -> Context {
        match self.kind {
            RequirementKind::Tool => Context::Build,
            RequirementKind::Regular | RequirementKind::Test => parent,
        }
    }

    /// Whether the edge hides its subtree from the requirer's dependants.
    pub fn is_isolated(&self) -> bool {
        self.private || self.kind == RequirementKind::Test
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> RecipeReference {
        RecipeReference::parse(s).unwrap()
    }

    #[test]
    fn tool_requirements_move_to_build_context() {
        assert_eq!(Requirement::tool(r("cmake/3.20")).context(Context::Host), Context::Build);
        assert_eq!(Requirement::new(r("zlib/1.0")).context(Context::Build), Context::Build);
        assert_eq!(Requirement::test(r("gtest/1.0")).context(Context::Host), Context::Host);
    }

    #[test]
    fn isolation() {
        assert!(Requirement::new(r("a/1.0")).private().is_isolated());
        assert!(Requirement::test(r("a/1.0")).is_isolated());
        assert!(!Requirement::new(r("a/1.0")).is_isolated());
    }
}
