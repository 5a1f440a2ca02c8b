//! Topological levels of a graph.

use crate::graph::{DepsGraph, NodeId, RecipeKind};
use rivet_schema::{BuildOrder, BuildOrderEntry};
use std::collections::BTreeSet;

/// Nodes grouped so that every node only depends on nodes of earlier levels.
///
/// A node's level is the length of its longest dependency chain, so leaves
/// come first and the root last. Levels are sorted by node id, which keeps
/// the order stable for identical graphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOrder {
    levels: Vec<Vec<NodeId>>,
}

impl InstallOrder {
    /// Compute the levels of `graph`.
    pub fn new(graph: &DepsGraph) -> Self {
        let count = graph.len();
        let dependencies: Vec<BTreeSet<NodeId>> = graph
            .nodes()
            .iter()
            .map(|n| n.dependencies.iter().map(|e| e.dst).collect())
            .collect();

        let mut pending: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
        let mut level = vec![0usize; count];
        let mut ready: Vec<NodeId> = (0..count).filter(|i| pending[*i] == 0).map(NodeId).collect();
        let mut placed = vec![false; count];

        while let Some(id) = ready.pop() {
            placed[id.0] = true;
            for dependant in &graph.node(id).dependants {
                let d = dependant.0;
                level[d] = level[d].max(level[id.0] + 1);
                pending[d] = pending[d].saturating_sub(1);
                if pending[d] == 0 && !placed[d] {
                    ready.push(*dependant);
                }
            }
        }

        let depth = level.iter().copied().max().map_or(0, |m| m + 1);
        let mut levels = vec![Vec::new(); depth];
        for i in (0..count).filter(|i| placed[*i]) {
            levels[level[i]].push(NodeId(i));
        }
        // Nodes left on a cycle go last
        let stuck: Vec<NodeId> = (0..count).filter(|i| !placed[*i]).map(NodeId).collect();
        if !stuck.is_empty() {
            tracing::warn!("{} node(s) could not be ordered", stuck.len());
            levels.push(stuck);
        }
        levels.retain(|l| !l.is_empty());

        Self { levels }
    }

    /// The levels, leaves first.
    pub fn by_levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    /// All nodes, level by level.
    pub fn flat(&self) -> Vec<NodeId> {
        self.levels.iter().flatten().copied().collect()
    }

    /// Build-order document of the installable nodes.
    ///
    /// Roots and platform nodes are left out, as are nodes without a
    /// revisioned reference and package id. With `flat` every entry lands
    /// in a single level.
    pub fn build_order(&self, graph: &DepsGraph, flat: bool) -> BuildOrder {
        let entry_of = |id: NodeId| -> Option<BuildOrderEntry> {
            let node = graph.node(id);
            if matches!(
                node.kind,
                RecipeKind::Virtual | RecipeKind::Consumer | RecipeKind::Platform
            ) {
                return None;
            }
            let reference = node.reference.clone().filter(|r| r.revision.is_some())?;
            Some(BuildOrderEntry {
                reference,
                package_id: node.package_id.clone()?,
                binary: node.binary,
                context: node.context,
                depends: Vec::new(),
            })
        };

        let mut levels: Vec<Vec<BuildOrderEntry>> = Vec::new();
        for level in &self.levels {
            let mut entries = Vec::new();
            for id in level {
                let Some(mut entry) = entry_of(*id) else {
                    continue;
                };
                let mut depends: Vec<String> = graph
                    .node(*id)
                    .dependencies
                    .iter()
                    .filter_map(|e| entry_of(e.dst))
                    .map(|e| e.key())
                    .collect();
                depends.sort();
                depends.dedup();
                entry.depends = depends;
                entries.push(entry);
            }
            if !entries.is_empty() {
                levels.push(entries);
            }
        }

        if flat {
            levels = vec![levels.into_iter().flatten().collect()];
            levels.retain(|l| !l.is_empty());
        }
        BuildOrder::from_levels(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node, Scope};
    use crate::requirement::Requirement;
    use rivet_schema::{Context, PackageId, RecipeReference};

    fn add(graph: &mut DepsGraph, reference: Option<&str>, kind: RecipeKind) -> NodeId {
        let scope = Scope {
            context: Context::Host,
            owner: None,
        };
        let mut node = Node::new(NodeId(0), kind, Context::Host, scope);
        if let Some(r) = reference {
            node.reference = Some(RecipeReference::parse(r).unwrap());
            node.package_id = Some(PackageId::new("p"));
        }
        graph.add_node(node)
    }

    fn link(graph: &mut DepsGraph, src: NodeId, dst: NodeId) {
        let reference = graph.node(dst).reference.clone().unwrap();
        graph.add_edge(
            src,
            Edge {
                dst,
                requirement: Requirement::new(reference),
                overridden: None,
            },
        );
    }

    /// cli -> app -> (liba, libb), liba -> libb
    fn diamond() -> (DepsGraph, [NodeId; 4]) {
        let mut graph = DepsGraph::new();
        let root = add(&mut graph, None, RecipeKind::Virtual);
        let app = add(&mut graph, Some("app/1.0#r1"), RecipeKind::Regular);
        let liba = add(&mut graph, Some("liba/1.0#r2"), RecipeKind::Regular);
        let libb = add(&mut graph, Some("libb/1.0#r3"), RecipeKind::Regular);
        link(&mut graph, root, app);
        link(&mut graph, app, liba);
        link(&mut graph, app, libb);
        link(&mut graph, liba, libb);
        (graph, [root, app, liba, libb])
    }

    #[test]
    fn longest_path_levels() {
        let (graph, [root, app, liba, libb]) = diamond();
        let order = InstallOrder::new(&graph);
        assert_eq!(
            order.by_levels(),
            &[vec![libb], vec![liba], vec![app], vec![root]]
        );
        assert_eq!(order.flat(), vec![libb, liba, app, root]);
    }

    #[test]
    fn siblings_share_a_level_in_id_order() {
        let mut graph = DepsGraph::new();
        let root = add(&mut graph, None, RecipeKind::Virtual);
        let b = add(&mut graph, Some("b/1.0#r"), RecipeKind::Regular);
        let a = add(&mut graph, Some("a/1.0#r"), RecipeKind::Regular);
        link(&mut graph, root, b);
        link(&mut graph, root, a);
        let order = InstallOrder::new(&graph);
        assert_eq!(order.by_levels()[0], vec![b, a]);
    }

    #[test]
    fn build_order_skips_root_and_lists_depends() {
        let (graph, _) = diamond();
        let order = InstallOrder::new(&graph).build_order(&graph, false);
        assert_eq!(order.levels().len(), 3);
        let app = &order.levels()[2][0];
        assert_eq!(app.reference.name, "app");
        assert_eq!(app.depends, vec!["liba/1.0#r2:p", "libb/1.0#r3:p"]);

        let flat = InstallOrder::new(&graph).build_order(&graph, true);
        assert_eq!(flat.levels().len(), 1);
        assert_eq!(flat.len(), 3);
    }
}
