//! Build-order file format.
//!
//! A build order is a list of levels; every entry of a level only depends
//! on entries of earlier levels. CI orchestration builds one level at a
//! time and merges the build orders of several configurations.

use crate::hash::PackageId;
use crate::reference::RecipeReference;
use crate::types::{BinaryStatus, Context};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One package to install or build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOrderEntry {
    /// Revisioned recipe reference.
    #[serde(rename = "ref")]
    pub reference: RecipeReference,
    /// Package id of the binary.
    pub package_id: PackageId,
    /// What has to happen to the binary.
    pub binary: BinaryStatus,
    /// Resolution context.
    pub context: Context,
    /// Keys of the entries this one needs first.
    #[serde(default)]
    pub depends: Vec<String>,
}

impl BuildOrderEntry {
    /// Unique key of the entry: `[build:]ref:package_id`.
    pub fn key(&self) -> String {
        let base = format!("{}:{}", self.reference, self.package_id);
        match self.context {
            Context::Host => base,
            Context::Build => format!("build:{base}"),
        }
    }

    fn binary_rank(&self) -> u8 {
        match self.binary {
            BinaryStatus::Build => 3,
            BinaryStatus::Download | BinaryStatus::Update => 2,
            BinaryStatus::Cache => 1,
            _ => 0,
        }
    }
}

/// Levels of build-order entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildOrder {
    levels: Vec<Vec<BuildOrderEntry>>,
}

impl BuildOrder {
    /// Wrap already-levelled entries.
    pub fn from_levels(levels: Vec<Vec<BuildOrderEntry>>) -> Self {
        Self { levels }
    }

    /// The levels, leaves first.
    pub fn levels(&self) -> &[Vec<BuildOrderEntry>] {
        &self.levels
    }

    /// Entries in level order.
    pub fn entries(&self) -> impl Iterator<Item = &BuildOrderEntry> {
        self.levels.iter().flatten()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Vec::is_empty)
    }

    /// Merge two build orders into one.
    ///
    /// Entries are unioned by key. When both sides carry the same key, a
    /// `Build` beats a download, which beats a cache hit; their `depends`
    /// are unioned. Levels are then recomputed from the dependencies with
    /// ties sorted by key, so the result does not depend on argument order.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged: BTreeMap<String, BuildOrderEntry> = BTreeMap::new();
        for entry in self.entries().chain(other.entries()) {
            let key = entry.key();
            match merged.get_mut(&key) {
                Some(existing) => {
                    let depends: BTreeSet<String> = existing
                        .depends
                        .iter()
                        .chain(&entry.depends)
                        .cloned()
                        .collect();
                    let incoming_wins = (entry.binary_rank(), entry.binary.to_string())
                        > (existing.binary_rank(), existing.binary.to_string());
                    if incoming_wins {
                        *existing = entry.clone();
                    }
                    existing.depends = depends.into_iter().collect();
                }
                None => {
                    let mut entry = entry.clone();
                    entry.depends.sort();
                    entry.depends.dedup();
                    merged.insert(key, entry);
                }
            }
        }
        Self::relevel(merged)
    }

    /// Kahn layering over `depends`; unknown dependency keys are ignored.
    fn relevel(entries: BTreeMap<String, BuildOrderEntry>) -> Self {
        let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependants: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (key, entry) in &entries {
            let deps: Vec<&str> = entry
                .depends
                .iter()
                .map(String::as_str)
                .filter(|d| entries.contains_key(*d))
                .collect();
            pending.insert(key, deps.len());
            for dep in deps {
                dependants.entry(dep).or_default().push(key);
            }
        }

        let mut levels = Vec::new();
        let mut current: Vec<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| *key)
            .collect();
        let mut placed = BTreeSet::new();
        while !current.is_empty() {
            let mut next = Vec::new();
            for key in &current {
                placed.insert(*key);
                for dependant in dependants.get(key).into_iter().flatten() {
                    if let Some(count) = pending.get_mut(dependant) {
                        *count -= 1;
                        if *count == 0 {
                            next.push(*dependant);
                        }
                    }
                }
            }
            levels.push(current.iter().map(|k| entries[*k].clone()).collect::<Vec<_>>());
            next.sort_unstable();
            current = next;
        }

        // Cyclic leftovers cannot be ordered; keep them in a final level
        let leftover: Vec<BuildOrderEntry> = entries
            .iter()
            .filter(|(key, _)| !placed.contains(key.as_str()))
            .map(|(_, entry)| entry.clone())
            .collect();
        if !leftover.is_empty() {
            tracing::warn!("{} build-order entries form a cycle", leftover.len());
            levels.push(leftover);
        }

        Self { levels }
    }
}
