//! Binary status analysis.
//!
//! Nodes are evaluated leaves first, so every dependency already carries
//! its package id (and, for builds, its status) when a node is reached.

use crate::error::{BinaryError, BuildPolicyError, Error, Result};
use crate::graph::{DepsGraph, NodeId, RecipeKind};
use crate::install_order::InstallOrder;
use crate::package_id::PackageIdComputer;
use crate::recipe::InvalidConfiguration;
use crate::session::Session;
use crate::store::PackageStore;
use rivet_schema::{BinaryStatus, PackageId, PkgReference, RecipeReference};

/// Parsed `--build` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildPolicy {
    never: bool,
    cascade: bool,
    missing: bool,
    missing_patterns: Vec<String>,
    patterns: Vec<String>,
    excluded: Vec<String>,
}

impl BuildPolicy {
    /// Parse policy arguments.
    ///
    /// Accepted: `*`, `never`, `missing`, `missing:<pattern>`, `cascade`,
    /// `<pattern>`, and `~<pattern>`/`!<pattern>` exclusions.
    ///
    /// # Errors
    ///
    /// [`BuildPolicyError`] when `never` is combined with anything else,
    /// or an argument is empty.
    pub fn parse(args: &[String]) -> std::result::Result<Self, BuildPolicyError> {
        let mut policy = Self::default();
        for arg in args {
            let arg = arg.trim();
            match arg {
                "" => return Err(BuildPolicyError("empty build policy".to_string())),
                "never" => policy.never = true,
                "missing" => policy.missing = true,
                "cascade" => policy.cascade = true,
                _ => {
                    if let Some(pattern) = arg.strip_prefix("missing:") {
                        policy.missing_patterns.push(pattern.to_string());
                    } else if let Some(pattern) =
                        arg.strip_prefix('~').or_else(|| arg.strip_prefix('!'))
                    {
                        policy.excluded.push(pattern.to_string());
                    } else {
                        policy.patterns.push(arg.to_string());
                    }
                }
            }
        }
        if policy.never && args.len() > 1 {
            return Err(BuildPolicyError(
                "'never' cannot be combined with other build policies".to_string(),
            ));
        }
        Ok(policy)
    }

    /// Whether nothing may be built.
    pub fn is_never(&self) -> bool {
        self.never
    }

    /// Whether dependants of built packages are rebuilt.
    pub fn is_cascade(&self) -> bool {
        self.cascade
    }

    fn excluded(&self, reference: &RecipeReference) -> bool {
        self.excluded.iter().any(|p| reference.matches(p, false))
    }

    /// Whether `reference` is built from source regardless of binaries.
    pub fn forces(&self, reference: &RecipeReference) -> bool {
        !self.excluded(reference) && self.patterns.iter().any(|p| reference.matches(p, false))
    }

    /// Whether `reference` may be built when no binary exists.
    pub fn allows_missing(&self, reference: &RecipeReference) -> bool {
        if self.excluded(reference) {
            return false;
        }
        (self.missing && self.missing_patterns.is_empty())
            || self.missing_patterns.iter().any(|p| reference.matches(p, false))
    }
}

/// A located binary.
struct Found {
    status: BinaryStatus,
    pref: PkgReference,
    remote: Option<String>,
}

/// Assigns a binary status to every node of a graph.
#[derive(Debug)]
pub struct BinaryResolver<'a> {
    session: &'a Session,
    policy: &'a BuildPolicy,
    computer: PackageIdComputer,
    update: bool,
}

impl<'a> BinaryResolver<'a> {
    /// Resolver using the session's package id modes.
    pub fn new(session: &'a Session, policy: &'a BuildPolicy, update: bool) -> Self {
        let resolver = &session.config.resolver;
        Self {
            session,
            policy,
            computer: PackageIdComputer::new(
                resolver.default_package_id_mode,
                resolver.build_package_id_mode,
            ),
            update,
        }
    }

    /// The package id computer in use.
    pub fn computer(&self) -> &PackageIdComputer {
        &self.computer
    }

    /// Compute package ids and binary statuses, then mark unneeded
    /// binaries as skipped.
    ///
    /// # Errors
    ///
    /// Returns package id customization errors and store failures.
    /// Missing and invalid binaries are recorded on the nodes; see
    /// [`check_binaries`].
    pub fn evaluate_graph(&self, graph: &mut DepsGraph) -> Result<()> {
        self.session.reporter.section("Computing necessary packages");
        for id in InstallOrder::new(graph).flat() {
            self.evaluate_node(graph, id)?;
        }
        skip_unneeded(graph);
        Ok(())
    }

    fn evaluate_node(&self, graph: &mut DepsGraph, id: NodeId) -> Result<()> {
        let node = graph.node(id);
        let fixed = match node.kind {
            RecipeKind::Virtual => {
                graph.node_mut(id).binary = BinaryStatus::Virtual;
                return Ok(());
            }
            RecipeKind::Consumer => Some(BinaryStatus::Consumer),
            RecipeKind::Editable => Some(BinaryStatus::Editable),
            RecipeKind::Platform => Some(BinaryStatus::Platform),
            RecipeKind::Regular => None,
        };

        let computed = self
            .computer
            .compute(graph, id)
            .map_err(|source| Error::PackageId {
                reference: node.label(),
                source,
            })?;
        let package_id = computed.package_id.clone();
        {
            let node = graph.node_mut(id);
            node.package_id = Some(computed.package_id);
            node.info = Some(computed.info);
            node.compatible_ids = computed.compatible;
        }
        if let Some(status) = fixed {
            graph.node_mut(id).binary = status;
            return Ok(());
        }

        let node = graph.node(id);
        let (Some(recipe), Some(reference)) = (node.recipe.clone(), node.reference.clone()) else {
            graph.node_mut(id).binary = BinaryStatus::Missing;
            return Ok(());
        };

        if let Err(InvalidConfiguration(reason)) = recipe.validate(&node.config) {
            self.set_status(graph, id, BinaryStatus::Invalid, Some(reason));
            return Ok(());
        }

        let (mut status, mut reason) = if package_id.is_unknown() {
            tracing::debug!("{reference}: package id unknown until dependencies are built");
            self.missing_decision(&reference)
        } else if self.policy.forces(&reference) {
            (BinaryStatus::Build, None)
        } else {
            let candidates: Vec<PackageId> = std::iter::once(package_id.clone())
                .chain(node.compatible_ids.iter().cloned())
                .collect();
            match self.lookup(&reference, &candidates)? {
                Some(found) => {
                    let node = graph.node_mut(id);
                    if found.pref.package_id != package_id {
                        tracing::info!(
                            "{reference}: using compatible package {}",
                            found.pref.package_id
                        );
                        node.package_id = Some(found.pref.package_id.clone());
                    }
                    node.pref = Some(found.pref);
                    node.binary_remote = found.remote;
                    (found.status, None)
                }
                None => self.missing_decision(&reference),
            }
        };

        let node = graph.node(id);
        if self.policy.is_cascade()
            && status.is_available()
            && node
                .dependencies
                .iter()
                .any(|e| graph.node(e.dst).binary == BinaryStatus::Build)
        {
            tracing::debug!("{reference}: rebuilt because a dependency is built");
            status = BinaryStatus::Build;
        }

        if status == BinaryStatus::Build {
            if let Err(InvalidConfiguration(why)) = recipe.validate_build(&node.config) {
                status = BinaryStatus::Invalid;
                reason = Some(why);
            }
        }
        if status == BinaryStatus::Build {
            let node = graph.node_mut(id);
            node.pref = None;
            node.binary_remote = None;
        }

        self.set_status(graph, id, status, reason);
        Ok(())
    }

    fn set_status(
        &self,
        graph: &mut DepsGraph,
        id: NodeId,
        status: BinaryStatus,
        reason: Option<String>,
    ) {
        let node = graph.node_mut(id);
        node.binary = status;
        node.invalid_reason = reason;
        if let (Some(reference), Some(pid)) = (&node.reference, &node.package_id) {
            self.session.reporter.binary(reference, pid.as_str(), status);
        }
    }

    /// Status of a node without a usable binary.
    fn missing_decision(&self, reference: &RecipeReference) -> (BinaryStatus, Option<String>) {
        if self.policy.allows_missing(reference) {
            (BinaryStatus::Build, None)
        } else if self.policy.is_never() {
            (
                BinaryStatus::Invalid,
                Some("No binary available and the build policy 'never' forbids building".to_string()),
            )
        } else {
            (BinaryStatus::Missing, None)
        }
    }

    /// Cache first, then remotes in order, for each candidate id in order.
    fn lookup(&self, reference: &RecipeReference, candidates: &[PackageId]) -> Result<Option<Found>> {
        let cache = self.session.cache.as_ref();
        for package_id in candidates {
            let query = PkgReference::new(reference.clone(), package_id.clone())?;

            if let Some(local) = cache.latest_package_revision(&query)? {
                if self.update {
                    if let Some((remote, newer)) = self.newer_remote(&query, local.timestamp) {
                        return Ok(Some(Found {
                            status: BinaryStatus::Update,
                            pref: newer,
                            remote: Some(remote),
                        }));
                    }
                }
                return Ok(Some(Found {
                    status: BinaryStatus::Cache,
                    pref: local,
                    remote: None,
                }));
            }

            for remote in &self.session.remotes {
                match remote.latest_package_revision(&query) {
                    Ok(Some(found)) => {
                        return Ok(Some(Found {
                            status: BinaryStatus::Download,
                            pref: found,
                            remote: Some(remote.name().to_string()),
                        }));
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Remote '{}' failed for {query}: {e}", remote.name()),
                }
            }
        }
        Ok(None)
    }

    fn newer_remote(&self, query: &PkgReference, than: Option<i64>) -> Option<(String, PkgReference)> {
        self.session.remotes.iter().find_map(|remote| {
            let latest = remote.latest_package_revision(query).ok().flatten()?;
            (latest.timestamp > than).then(|| (remote.name().to_string(), latest))
        })
    }
}

/// Mark binaries nobody needs as [`BinaryStatus::Skip`].
///
/// The root is needed. A needed node needs its regular host dependencies,
/// and every dependency when it is built itself.
pub fn skip_unneeded(graph: &mut DepsGraph) {
    let Some(root) = graph.root().map(|n| n.id) else {
        return;
    };
    let mut needed = vec![false; graph.len()];
    needed[root.0] = true;
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let node = graph.node(id);
        let builds = node.is_root()
            || matches!(node.binary, BinaryStatus::Build | BinaryStatus::Editable);
        for edge in &node.dependencies {
            if !needed[edge.dst.0] && (builds || graph.is_regular_edge(id, edge)) {
                needed[edge.dst.0] = true;
                stack.push(edge.dst);
            }
        }
    }

    for (index, is_needed) in needed.into_iter().enumerate() {
        let node = graph.node_mut(NodeId(index));
        if !is_needed
            && matches!(
                node.binary,
                BinaryStatus::Cache
                    | BinaryStatus::Download
                    | BinaryStatus::Update
                    | BinaryStatus::Missing
                    | BinaryStatus::Invalid
            )
        {
            tracing::debug!("{}: binary not needed, skipping", node.label());
            node.binary = BinaryStatus::Skip;
        }
    }
}

/// Fail with every invalid node, or else every missing one.
///
/// # Errors
///
/// [`BinaryError::Invalid`] or [`BinaryError::Missing`], listing all
/// affected nodes.
pub fn check_binaries(graph: &DepsGraph) -> std::result::Result<(), BinaryError> {
    let invalid: Vec<(String, String)> = graph
        .nodes()
        .iter()
        .filter(|n| n.binary == BinaryStatus::Invalid)
        .map(|n| {
            (
                n.label(),
                n.invalid_reason.clone().unwrap_or_else(|| "invalid configuration".to_string()),
            )
        })
        .collect();
    if !invalid.is_empty() {
        return Err(BinaryError::Invalid(invalid));
    }

    let missing: Vec<String> = graph
        .nodes()
        .iter()
        .filter(|n| n.binary == BinaryStatus::Missing)
        .map(|n| match &n.package_id {
            Some(pid) => format!("{}:{pid}", n.label()),
            None => n.label(),
        })
        .collect();
    if !missing.is_empty() {
        return Err(BinaryError::Missing(missing));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(args: &[&str]) -> BuildPolicy {
        BuildPolicy::parse(&args.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
    }

    fn r(s: &str) -> RecipeReference {
        RecipeReference::parse(s).unwrap()
    }

    #[test]
    fn empty_policy_builds_nothing() {
        let p = policy(&[]);
        assert!(!p.forces(&r("zlib/1.0")));
        assert!(!p.allows_missing(&r("zlib/1.0")));
        assert!(!p.is_never());
    }

    #[test]
    fn patterns_and_exclusions() {
        let p = policy(&["*", "~zlib/*"]);
        assert!(p.forces(&r("openssl/3.0")));
        assert!(!p.forces(&r("zlib/1.3")));

        let p = policy(&["missing:open*", "cascade"]);
        assert!(p.allows_missing(&r("openssl/3.0")));
        assert!(!p.allows_missing(&r("zlib/1.3")));
        assert!(p.is_cascade());

        let p = policy(&["missing", "!zlib"]);
        assert!(p.allows_missing(&r("bzip2/1.0")));
        assert!(!p.allows_missing(&r("zlib/1.3")));
    }

    #[test]
    fn never_stands_alone() {
        assert!(policy(&["never"]).is_never());
        let args = vec!["never".to_string(), "missing".to_string()];
        assert!(BuildPolicy::parse(&args).is_err());
        assert!(BuildPolicy::parse(&[String::new()]).is_err());
    }
}
