//! The dependency graph.
//!
//! Nodes live in an arena owned by [`DepsGraph`] and point at each other
//! by [`NodeId`]: dependency edges are owned by the requiring node, and
//! `dependants` holds the reverse links.

use crate::package_id::PackageInfo;
use crate::recipe::{Configuration, Recipe};
use crate::requirement::{Requirement, RequirementKind};
use rivet_schema::{BinaryStatus, Context, PackageId, PackagesList, PkgReference, RecipeReference};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors recorded on the graph during expansion.
///
/// They do not abort expansion of the process: the partial graph is kept
/// for inspection and [`DepsGraph::report_graph_error`] turns them into
/// failures.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GraphError {
    /// Two requirements of the same identity cannot be reconciled.
    #[error(
        "Version conflict: '{requirer}' requires '{required}' but '{existing}' was already selected"
    )]
    Conflict {
        /// Node declaring the losing requirement.
        requirer: String,
        /// What it asked for.
        required: String,
        /// What the graph already holds.
        existing: String,
    },

    /// A recipe was found nowhere.
    #[error("Package '{reference}' not resolved: no recipe found in cache or remotes (required by '{requirer}')")]
    Missing {
        /// Unresolvable reference.
        reference: String,
        /// Node requiring it.
        requirer: String,
    },

    /// A requirement leads back to one of its own ancestors.
    #[error("There is a cycle/loop in the graph: {}", path.join(" -> "))]
    Loop {
        /// Chain of references forming the loop.
        path: Vec<String>,
    },
}

/// Arena index of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of recipe a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeKind {
    /// A recipe from the cache or a remote.
    Regular,
    /// The root recipe being consumed.
    Consumer,
    /// Synthetic root holding command line requirements.
    Virtual,
    /// A recipe used from a local editable folder.
    Editable,
    /// Provided by the system.
    Platform,
}

/// Resolution scope of a node.
///
/// Private and test edges resolve their subtree in a scope owned by the
/// requiring node, invisible to the rest of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Scope {
    /// Context of the scope.
    pub context: Context,
    /// Node owning an isolated scope.
    pub owner: Option<NodeId>,
}

/// A dependency edge.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    /// Dependency node.
    pub dst: NodeId,
    /// The declaring requirement.
    pub requirement: Requirement,
    /// Set when the dependency resolved to something other than what was
    /// requested (an override, or a closer requirement, won).
    pub overridden: Option<RecipeReference>,
}

/// A graph vertex.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    /// Arena index.
    pub id: NodeId,
    /// Resolved recipe reference; `None` for the virtual root.
    #[serde(rename = "ref")]
    pub reference: Option<RecipeReference>,
    /// Recipe kind.
    pub kind: RecipeKind,
    /// Resolution context.
    pub context: Context,
    /// Resolution scope.
    pub scope: Scope,
    /// Distance from the root.
    pub depth: usize,
    /// Store the recipe came from (`cache` or a remote name).
    pub recipe_origin: Option<String>,
    /// Recipe implementation.
    #[serde(skip)]
    pub recipe: Option<Arc<dyn Recipe>>,
    /// Effective settings and options.
    pub config: Configuration,
    /// Reached only through test edges.
    pub test: bool,
    /// Reached only through private edges.
    pub private: bool,
    /// Dependencies in declaration order.
    pub dependencies: Vec<Edge>,
    /// Nodes depending on this one.
    pub dependants: Vec<NodeId>,
    /// Computed package id.
    pub package_id: Option<PackageId>,
    /// Info the package id was computed from.
    #[serde(skip)]
    pub info: Option<PackageInfo>,
    /// Compatible fallback ids in priority order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compatible_ids: Vec<PackageId>,
    /// Binary status.
    pub binary: BinaryStatus,
    /// Located (or produced) binary.
    pub pref: Option<PkgReference>,
    /// Remote the binary comes from.
    pub binary_remote: Option<String>,
    /// Why the binary is INVALID.
    pub invalid_reason: Option<String>,
}

impl Node {
    pub(crate) fn new(id: NodeId, kind: RecipeKind, context: Context, scope: Scope) -> Self {
        Self {
            id,
            reference: None,
            kind,
            context,
            scope,
            depth: 0,
            recipe_origin: None,
            recipe: None,
            config: Configuration::default(),
            test: false,
            private: false,
            dependencies: Vec::new(),
            dependants: Vec::new(),
            package_id: None,
            info: None,
            compatible_ids: Vec::new(),
            binary: BinaryStatus::Unknown,
            pref: None,
            binary_remote: None,
            invalid_reason: None,
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> String {
        match (&self.reference, self.kind) {
            (Some(r), _) => r.to_string(),
            (None, RecipeKind::Virtual) => "cli".to_string(),
            (None, _) => format!("node {}", self.id),
        }
    }

    /// Whether this is the consumer or virtual root.
    pub fn is_root(&self) -> bool {
        matches!(self.kind, RecipeKind::Consumer | RecipeKind::Virtual)
    }

    /// The package reference of this node's binary, if it has both a
    /// revisioned recipe and a package id.
    pub fn package_reference(&self) -> Option<PkgReference> {
        if let Some(pref) = &self.pref {
            return Some(pref.clone());
        }
        let rref = self.reference.clone()?;
        let pid = self.package_id.clone()?;
        PkgReference::new(rref, pid).ok()
    }
}

/// An override applied during expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverrideRecord {
    /// Node whose requirement was overridden.
    pub requirer: NodeId,
    /// What it asked for.
    pub requested: RecipeReference,
    /// What it got.
    pub resolved: RecipeReference,
}

/// A resolved dependency graph.
#[derive(Debug, Default, Serialize)]
pub struct DepsGraph {
    nodes: Vec<Node>,
    /// First error found while expanding, if any.
    pub error: Option<GraphError>,
    /// Overridden requirements, in the order they were applied.
    pub overrides: Vec<OverrideRecord>,
}

impl DepsGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_node(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        self.nodes.push(node);
        id
    }

    pub(crate) fn add_edge(&mut self, src: NodeId, edge: Edge) {
        let dst = edge.dst;
        self.nodes[src.0].dependencies.push(edge);
        if !self.nodes[dst.0].dependants.contains(&src) {
            self.nodes[dst.0].dependants.push(src);
        }
    }

    /// The root node.
    pub fn root(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// Node by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Mutable node by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes whose reference has the given name.
    pub fn find(&self, name: &str) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.reference.as_ref().is_some_and(|r| r.name == name))
            .collect()
    }

    /// All transitive dependants of `id` (not including `id`).
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = self.nodes[id.0].dependants.clone();
        let mut out = Vec::new();
        while let Some(next) = stack.pop() {
            if seen[next.0] {
                continue;
            }
            seen[next.0] = true;
            out.push(next);
            stack.extend(self.nodes[next.0].dependants.iter().copied());
        }
        out
    }

    /// Whether the edge `src -> dst` is a regular, visible host dependency.
    pub fn is_regular_edge(&self, src: NodeId, edge: &Edge) -> bool {
        edge.requirement.kind == RequirementKind::Regular
            && !edge.requirement.private
            && self.nodes[edge.dst.0].context == self.nodes[src.0].context
    }

    /// Fail if expansion recorded an error.
    ///
    /// # Errors
    ///
    /// Returns the recorded [`GraphError`].
    pub fn report_graph_error(&self) -> Result<(), GraphError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Recipes and binaries this graph installs or uses from the cache.
    pub fn packages_list(&self) -> PackagesList {
        let mut list = PackagesList::new();
        for node in &self.nodes {
            if !matches!(
                node.binary,
                BinaryStatus::Cache | BinaryStatus::Download | BinaryStatus::Update | BinaryStatus::Build
            ) {
                continue;
            }
            let Some(reference) = &node.reference else {
                continue;
            };
            list.add_recipe(reference);
            if let Some(pref) = node.pref.as_ref().filter(|p| p.revision.is_some()) {
                let info = serde_json::json!({
                    "settings": node.config.settings,
                    "options": node.config.options,
                });
                list.add_package(pref, info);
            }
        }
        list
    }

    /// JSON rendering for `graph info`, including any recorded error.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
