//! Capturing a resolved graph into a lockfile.

use crate::graph::{DepsGraph, RecipeKind};
use rivet_schema::{LockNode, Lockfile, lock_key};

/// Lock entries of every recipe node of the graph.
///
/// Roots and platform nodes are not locked.
pub fn lock_nodes(graph: &DepsGraph) -> Vec<LockNode> {
    graph
        .nodes()
        .iter()
        .filter(|n| matches!(n.kind, RecipeKind::Regular | RecipeKind::Editable))
        .filter_map(|node| {
            let reference = node.reference.clone()?;
            let mut lock = LockNode::new(reference, node.context);
            lock.package_id = node.package_id.clone().filter(|p| !p.is_unknown());
            lock.prev = node.pref.as_ref().and_then(|p| p.revision.clone());
            let mut requires: Vec<String> = node
                .dependencies
                .iter()
                .filter_map(|edge| {
                    let dep = graph.node(edge.dst);
                    match dep.kind {
                        RecipeKind::Regular | RecipeKind::Editable => dep
                            .reference
                            .as_ref()
                            .map(|r| lock_key(r, dep.context)),
                        _ => None,
                    }
                })
                .collect();
            requires.sort();
            requires.dedup();
            lock.requires = requires;
            Some(lock)
        })
        .collect()
}

/// New lockfile capturing `graph`.
pub fn create(graph: &DepsGraph) -> Lockfile {
    let mut lockfile = Lockfile::new();
    for node in lock_nodes(graph) {
        lockfile.insert(node);
    }
    tracing::debug!("Locked {} node(s)", lockfile.len());
    lockfile
}

/// Refresh `lockfile` from `graph`; returns the number of changed nodes.
pub fn update(lockfile: &mut Lockfile, graph: &DepsGraph, clean: bool) -> usize {
    lockfile.update(lock_nodes(graph), clean)
}
