//! Lockfile format.
//!
//! A lockfile pins a previous resolution: for each node its revisioned
//! reference, package id and package revision. Nodes are keyed by their
//! revision-less reference, with a `build:` prefix for build-context nodes.

use crate::hash::PackageId;
use crate::reference::RecipeReference;
use crate::types::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Current lockfile format version.
pub const LOCKFILE_VERSION: &str = "0.5";

/// Errors reading or writing a lockfile.
#[derive(Error, Debug)]
pub enum LockfileError {
    /// Filesystem error.
    #[error("Lockfile I/O error at {path}: {source}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The file is not a valid lockfile.
    #[error("Invalid lockfile {path}: {source}")]
    Json {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// A required reference is not pinned by a strict lockfile.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Requirement '{reference}' ({context}) not found in lockfile and lockfile is not partial")]
pub struct LockfileStrictError {
    /// The unpinned requirement.
    pub reference: String,
    /// Context it was required in.
    pub context: Context,
}

/// One locked node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockNode {
    /// Revisioned recipe reference.
    #[serde(rename = "ref")]
    pub reference: RecipeReference,
    /// Package id, when the node has a binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<PackageId>,
    /// Package revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    /// Resolution context.
    #[serde(default)]
    pub context: Context,
    /// Python-requires pinned alongside the node.
    #[serde(default)]
    pub python_requires: Vec<RecipeReference>,
    /// Keys of the nodes this one depends on.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Set when an update pass changed this node.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub modified: bool,
}

impl LockNode {
    /// A pin for a bare reference.
    pub fn new(reference: RecipeReference, context: Context) -> Self {
        Self {
            reference,
            package_id: None,
            prev: None,
            context,
            python_requires: Vec::new(),
            requires: Vec::new(),
            modified: false,
        }
    }

    /// Key under which the node is stored.
    pub fn key(&self) -> String {
        lock_key(&self.reference, self.context)
    }

    fn same_resolution(&self, other: &Self) -> bool {
        self.reference == other.reference
            && self.package_id == other.package_id
            && self.prev == other.prev
    }

    /// Total order used to pick a merge winner.
    fn merge_rank(&self) -> (Option<i64>, bool, String, String) {
        (
            self.reference.timestamp,
            self.modified,
            self.reference.to_string(),
            serde_json::to_string(self).unwrap_or_default(),
        )
    }
}

/// Lock key of a reference in a context.
pub fn lock_key(reference: &RecipeReference, context: Context) -> String {
    let plain = reference.without_revision();
    match context {
        Context::Host => plain.to_string(),
        Context::Build => format!("build:{plain}"),
    }
}

/// Node table of a lockfile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphLock {
    /// Locked nodes by key.
    #[serde(default)]
    pub nodes: BTreeMap<String, LockNode>,
}

/// A lockfile document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    /// Format version.
    pub version: String,
    /// Locked graph.
    #[serde(default)]
    pub graph_lock: GraphLock,
}

impl Default for Lockfile {
    fn default() -> Self {
        Self {
            version: LOCKFILE_VERSION.to_string(),
            graph_lock: GraphLock::default(),
        }
    }
}

impl Lockfile {
    /// Empty lockfile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a lockfile; a missing file yields an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, LockfileError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path).map_err(|source| LockfileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| LockfileError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse a lockfile from JSON text.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed input.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Save the lockfile as pretty JSON.
    ///
    /// The file is first written to a temporary location and then renamed so
    /// that readers never observe a partially written lockfile.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, file writing, or the rename fails.
    pub fn save(&self, path: &Path) -> Result<(), LockfileError> {
        let io_err = |source| LockfileError::Io {
            path: path.display().to_string(),
            source,
        };
        let content = serde_json::to_string_pretty(self).map_err(|source| LockfileError::Json {
            path: path.display().to_string(),
            source,
        })?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("lock.tmp");
        std::fs::write(&temp_path, content).map_err(io_err)?;
        std::fs::rename(&temp_path, path).map_err(io_err)?;
        Ok(())
    }

    /// All locked nodes by key.
    pub fn nodes(&self) -> &BTreeMap<String, LockNode> {
        &self.graph_lock.nodes
    }

    /// Number of locked nodes.
    pub fn len(&self) -> usize {
        self.graph_lock.nodes.len()
    }

    /// Whether nothing is locked.
    pub fn is_empty(&self) -> bool {
        self.graph_lock.nodes.is_empty()
    }

    /// Insert or replace a node under its key.
    pub fn insert(&mut self, node: LockNode) {
        self.graph_lock.nodes.insert(node.key(), node);
    }

    /// Pin bare references (`lock add`). Existing pins for the same key are replaced.
    pub fn add(&mut self, references: impl IntoIterator<Item = RecipeReference>, context: Context) {
        for reference in references {
            tracing::debug!("Adding {reference} ({context}) to lockfile");
            self.insert(LockNode::new(reference, context));
        }
    }

    /// Union with another lockfile.
    ///
    /// On key collision the node with the newer reference timestamp wins;
    /// ties go to the `modified` node, then to the lexically greater
    /// reference. The result does not depend on argument order.
    pub fn merge(&mut self, other: &Self) {
        for (key, theirs) in &other.graph_lock.nodes {
            match self.graph_lock.nodes.get_mut(key) {
                Some(ours) => {
                    if theirs.merge_rank() > ours.merge_rank() {
                        *ours = theirs.clone();
                    }
                }
                None => {
                    self.graph_lock.nodes.insert(key.clone(), theirs.clone());
                }
            }
        }
    }

    /// Replace the lock with a new resolution.
    ///
    /// Nodes whose resolution changed (or that are new) are flagged
    /// `modified`. With `clean`, keys not present in `resolved` are
    /// dropped. Returns the number of modified nodes.
    pub fn update(&mut self, resolved: impl IntoIterator<Item = LockNode>, clean: bool) -> usize {
        let mut touched = BTreeMap::new();
        let mut modified = 0;
        for mut node in resolved {
            let key = node.key();
            node.modified = match self.graph_lock.nodes.get(&key) {
                Some(old) => !old.same_resolution(&node),
                None => true,
            };
            if node.modified {
                tracing::debug!("Lockfile node {key} changed to {}", node.reference);
                modified += 1;
            }
            touched.insert(key, node);
        }
        if clean {
            self.graph_lock.nodes = touched;
        } else {
            self.graph_lock.nodes.extend(touched);
        }
        modified
    }

    /// Find the pinned reference for a requirement.
    ///
    /// Ranges pick the greatest locked version inside the range; plain
    /// versions need a value-equal locked version (and the same revision
    /// if the requirement names one).
    ///
    /// # Errors
    ///
    /// Returns [`LockfileStrictError`] when nothing matches and the lock
    /// is not `partial`.
    pub fn pin_for(
        &self,
        requirement: &RecipeReference,
        context: Context,
        partial: bool,
    ) -> Result<Option<&LockNode>, LockfileStrictError> {
        let range = requirement.version_range().and_then(Result::ok);
        let key = requirement.key();
        let pinned = self
            .graph_lock
            .nodes
            .values()
            .filter(|n| n.context == context && n.reference.key() == key)
            .filter(|n| match &range {
                Some(range) => range.contains(&n.reference.version),
                None => {
                    n.reference.version.value_eq(&requirement.version)
                        && (requirement.revision.is_none()
                            || requirement.revision == n.reference.revision)
                }
            })
            .max_by(|a, b| a.reference.cmp(&b.reference));

        match pinned {
            Some(node) => Ok(Some(node)),
            None if partial => Ok(None),
            None => Err(LockfileStrictError {
                reference: requirement.to_string(),
                context,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(reference: &str, context: Context) -> LockNode {
        LockNode::new(RecipeReference::parse(reference).unwrap(), context)
    }

    fn lock(nodes: &[LockNode]) -> Lockfile {
        let mut lock = Lockfile::new();
        for n in nodes {
            lock.insert(n.clone());
        }
        lock
    }

    #[test]
    fn keys_separate_contexts() {
        assert_eq!(node("cmake/3.20#r1", Context::Build).key(), "build:cmake/3.20");
        assert_eq!(node("zlib/1.0#r1", Context::Host).key(), "zlib/1.0");
    }

    #[test]
    fn merge_is_commutative() {
        let a = lock(&[node("zlib/1.0#r1%10", Context::Host), node("bzip2/1.0#b1%1", Context::Host)]);
        let b = lock(&[node("zlib/1.0#r2%20", Context::Host), node("cmake/3.20#c%1", Context::Build)]);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 3);
        assert_eq!(
            ab.nodes()["zlib/1.0"].reference.revision.as_deref(),
            Some("r2")
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let a = lock(&[node("zlib/1.0#r1%10", Context::Host)]);
        let mut aa = a.clone();
        aa.merge(&a);
        assert_eq!(aa, a);
    }

    #[test]
    fn merge_prefers_modified_on_equal_timestamp() {
        let mut changed = node("zlib/1.0#r1%10", Context::Host);
        changed.modified = true;
        changed.package_id = Some(PackageId::new("p2"));
        let mut a = lock(&[node("zlib/1.0#r1%10", Context::Host)]);
        a.merge(&lock(&[changed.clone()]));
        assert_eq!(a.nodes()["zlib/1.0"], changed);
    }

    #[test]
    fn pin_for_range_picks_greatest_inside() {
        let lock = lock(&[
            node("zlib/1.0#r1", Context::Host),
            node("zlib/1.5#r2", Context::Host),
            node("zlib/2.0#r3", Context::Host),
        ]);
        let req = RecipeReference::parse("zlib/[>=1.0 <2]").unwrap();
        let pinned = lock.pin_for(&req, Context::Host, false).unwrap().unwrap();
        assert_eq!(pinned.reference.to_string(), "zlib/1.5#r2");
    }

    #[test]
    fn pin_for_respects_context() {
        let lock = lock(&[node("cmake/3.20#r1", Context::Build)]);
        let req = RecipeReference::parse("cmake/3.20").unwrap();
        assert!(lock.pin_for(&req, Context::Host, true).unwrap().is_none());
        assert!(lock.pin_for(&req, Context::Build, false).unwrap().is_some());
    }

    #[test]
    fn strict_lock_rejects_unpinned() {
        let lock = lock(&[node("zlib/1.0#r1", Context::Host)]);
        let req = RecipeReference::parse("openssl/3.0").unwrap();
        let err = lock.pin_for(&req, Context::Host, false).unwrap_err();
        assert_eq!(err.reference, "openssl/3.0");
    }

    #[test]
    fn update_flags_changes_and_cleans() {
        let mut lock = lock(&[node("zlib/1.0#r1", Context::Host), node("old/1.0#o", Context::Host)]);
        let modified = lock.update(
            vec![node("zlib/1.0#r1", Context::Host), node("bzip2/1.0#b", Context::Host)],
            true,
        );
        assert_eq!(modified, 1);
        assert!(!lock.nodes()["zlib/1.0"].modified);
        assert!(lock.nodes()["bzip2/1.0"].modified);
        assert!(!lock.nodes().contains_key("old/1.0"));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rivet.lock");
        let mut lock = lock(&[node("zlib/1.0#r1%3", Context::Host)]);
        lock.add(vec![RecipeReference::parse("cmake/3.20").unwrap()], Context::Build);
        lock.save(&path).unwrap();

        let loaded = Lockfile::load(&path).unwrap();
        assert_eq!(loaded, lock);
        assert!(!path.with_extension("lock.tmp").exists());
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Lockfile::load(&dir.path().join("nope.lock")).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.version, LOCKFILE_VERSION);
    }
}
