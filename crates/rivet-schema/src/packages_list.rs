//! Lists of recipe and package revisions.
//!
//! Used for `list` output and for the set of binaries a graph installed.
//! Revisions are kept oldest first, so replaying the list re-uploads or
//! re-installs older revisions before newer ones.

use crate::reference::{PkgReference, RecipeReference};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A package revision with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageRevisionEntry {
    /// Package revision.
    pub revision: String,
    /// Creation time (Unix seconds).
    pub timestamp: Option<i64>,
    /// Free-form binary info (settings, options).
    pub info: serde_json::Value,
}

/// A package id and its revisions.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageEntry {
    /// Package id.
    pub package_id: String,
    /// Revisions, oldest first.
    pub revisions: Vec<PackageRevisionEntry>,
}

/// A recipe revision and its packages.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeRevisionEntry {
    /// Recipe revision.
    pub revision: String,
    /// Creation time (Unix seconds).
    pub timestamp: Option<i64>,
    /// Packages of this revision in insertion order.
    pub packages: Vec<PackageEntry>,
}

/// Recipes by revision-less reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackagesList {
    recipes: Vec<(String, Vec<RecipeRevisionEntry>)>,
}

impl PackagesList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recipes.
    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Recipes with their revisions.
    pub fn recipes(&self) -> impl Iterator<Item = (&str, &[RecipeRevisionEntry])> {
        self.recipes.iter().map(|(r, revs)| (r.as_str(), revs.as_slice()))
    }

    fn revisions_mut(&mut self, rref: &RecipeReference) -> &mut Vec<RecipeRevisionEntry> {
        let key = rref.without_revision().to_string();
        let index = match self.recipes.iter().position(|(r, _)| *r == key) {
            Some(index) => index,
            None => {
                self.recipes.push((key, Vec::new()));
                self.recipes.len() - 1
            }
        };
        &mut self.recipes[index].1
    }

    /// Add a recipe (and its revision, if it has one).
    pub fn add_recipe(&mut self, rref: &RecipeReference) {
        let revisions = self.revisions_mut(rref);
        let Some(revision) = &rref.revision else {
            return;
        };
        if revisions.iter().any(|r| &r.revision == revision) {
            return;
        }
        revisions.push(RecipeRevisionEntry {
            revision: revision.clone(),
            timestamp: rref.timestamp,
            packages: Vec::new(),
        });
        revisions.sort_by(|a, b| (a.timestamp, &a.revision).cmp(&(b.timestamp, &b.revision)));
    }

    /// Add a package (and its revision, if it has one).
    pub fn add_package(&mut self, pref: &PkgReference, info: serde_json::Value) {
        self.add_recipe(&pref.rref);
        let revisions = self.revisions_mut(&pref.rref);
        let Some(recipe_rev) = revisions
            .iter_mut()
            .find(|r| Some(&r.revision) == pref.rref.revision.as_ref())
        else {
            return;
        };

        let package_id = pref.package_id.as_str();
        let package = match recipe_rev
            .packages
            .iter()
            .position(|p| p.package_id == package_id)
        {
            Some(index) => &mut recipe_rev.packages[index],
            None => {
                recipe_rev.packages.push(PackageEntry {
                    package_id: package_id.to_string(),
                    revisions: Vec::new(),
                });
                let last = recipe_rev.packages.len() - 1;
                &mut recipe_rev.packages[last]
            }
        };

        let Some(prev) = &pref.revision else {
            return;
        };
        if package.revisions.iter().any(|r| &r.revision == prev) {
            return;
        }
        package.revisions.push(PackageRevisionEntry {
            revision: prev.clone(),
            timestamp: pref.timestamp,
            info,
        });
        package
            .revisions
            .sort_by(|a, b| (a.timestamp, &a.revision).cmp(&(b.timestamp, &b.revision)));
    }

    /// Add everything from `other`.
    pub fn merge(&mut self, other: &Self) {
        for (reference, revisions) in &other.recipes {
            let Ok(base) = RecipeReference::parse(reference) else {
                continue;
            };
            for rev in revisions {
                let rref = base.clone().with_revision(&rev.revision, rev.timestamp);
                self.add_recipe(&rref);
                for package in &rev.packages {
                    for prev in &package.revisions {
                        let pref = PkgReference {
                            rref: rref.clone(),
                            package_id: package.package_id.as_str().into(),
                            revision: Some(prev.revision.clone()),
                            timestamp: prev.timestamp,
                        };
                        self.add_package(&pref, prev.info.clone());
                    }
                }
            }
        }
    }
}

struct Ordered<'a, T>(&'a [T]);

impl Serialize for Ordered<'_, PackageRevisionEntry> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for rev in self.0 {
            map.serialize_entry(
                &rev.revision,
                &RawPackageRevision {
                    timestamp: rev.timestamp,
                    info: rev.info.clone(),
                },
            )?;
        }
        map.end()
    }
}

impl Serialize for Ordered<'_, PackageEntry> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for package in self.0 {
            let mut inner = BTreeMap::new();
            inner.insert("revisions", Ordered(&package.revisions));
            map.serialize_entry(&package.package_id, &inner)?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct RecipeRevisionOut<'a> {
    timestamp: Option<i64>,
    packages: Ordered<'a, PackageEntry>,
}

impl Serialize for Ordered<'_, RecipeRevisionEntry> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for rev in self.0 {
            map.serialize_entry(
                &rev.revision,
                &RecipeRevisionOut {
                    timestamp: rev.timestamp,
                    packages: Ordered(&rev.packages),
                },
            )?;
        }
        map.end()
    }
}

impl Serialize for PackagesList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.recipes.len()))?;
        for (reference, revisions) in &self.recipes {
            let mut inner = BTreeMap::new();
            inner.insert("revisions", Ordered(revisions));
            map.serialize_entry(reference, &inner)?;
        }
        map.end()
    }
}

#[derive(Serialize, Deserialize)]
struct RawPackageRevision {
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    info: serde_json::Value,
}

#[derive(Deserialize)]
struct RawPackage {
    #[serde(default)]
    revisions: BTreeMap<String, RawPackageRevision>,
}

#[derive(Deserialize)]
struct RawRecipeRevision {
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    packages: BTreeMap<String, RawPackage>,
}

#[derive(Deserialize)]
struct RawRecipe {
    #[serde(default)]
    revisions: BTreeMap<String, RawRecipeRevision>,
}

impl<'de> Deserialize<'de> for PackagesList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, RawRecipe>::deserialize(deserializer)?;
        let mut recipes = Vec::with_capacity(raw.len());
        for (reference, recipe) in raw {
            let mut revisions: Vec<RecipeRevisionEntry> = recipe
                .revisions
                .into_iter()
                .map(|(revision, rev)| RecipeRevisionEntry {
                    revision,
                    timestamp: rev.timestamp,
                    packages: rev
                        .packages
                        .into_iter()
                        .map(|(package_id, package)| {
                            let mut revisions: Vec<PackageRevisionEntry> = package
                                .revisions
                                .into_iter()
                                .map(|(revision, prev)| PackageRevisionEntry {
                                    revision,
                                    timestamp: prev.timestamp,
                                    info: prev.info,
                                })
                                .collect();
                            revisions.sort_by(|a, b| {
                                (a.timestamp, &a.revision).cmp(&(b.timestamp, &b.revision))
                            });
                            PackageEntry {
                                package_id,
                                revisions,
                            }
                        })
                        .collect(),
                })
                .collect();
            revisions.sort_by(|a, b| (a.timestamp, &a.revision).cmp(&(b.timestamp, &b.revision)));
            recipes.push((reference, revisions));
        }
        Ok(Self { recipes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rref(s: &str) -> RecipeReference {
        RecipeReference::parse(s).unwrap()
    }

    #[test]
    fn revisions_sorted_oldest_first() {
        let mut list = PackagesList::new();
        list.add_recipe(&rref("zlib/1.0#newer%200"));
        list.add_recipe(&rref("zlib/1.0#older%100"));
        list.add_recipe(&rref("zlib/1.0#newer%200"));

        let (_, revisions) = list.recipes().next().unwrap();
        let names: Vec<&str> = revisions.iter().map(|r| r.revision.as_str()).collect();
        assert_eq!(names, vec!["older", "newer"]);
    }

    #[test]
    fn serialized_shape_preserves_order() {
        let mut list = PackagesList::new();
        let pref_b = PkgReference::parse("zlib/1.0#r1%10:pid#bbb%20").unwrap();
        let pref_a = PkgReference::parse("zlib/1.0#r1%10:pid#aaa%30").unwrap();
        list.add_package(&pref_b, serde_json::json!({"settings": {"os": "Linux"}}));
        list.add_package(&pref_a, serde_json::Value::Null);

        let json = serde_json::to_string(&list).unwrap();
        let b = json.find("\"bbb\"").unwrap();
        let a = json.find("\"aaa\"").unwrap();
        assert!(b < a, "older package revision must come first: {json}");

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let prev = &value["zlib/1.0"]["revisions"]["r1"]["packages"]["pid"]["revisions"]["bbb"];
        assert_eq!(prev["timestamp"], 20);
        assert_eq!(prev["info"]["settings"]["os"], "Linux");
    }

    #[test]
    fn deserialize_sorts_by_timestamp() {
        let json = r#"{"zlib/1.0": {"revisions": {
            "a": {"timestamp": 300, "packages": {}},
            "b": {"timestamp": 100, "packages": {}}
        }}}"#;
        let list: PackagesList = serde_json::from_str(json).unwrap();
        let (_, revisions) = list.recipes().next().unwrap();
        assert_eq!(revisions[0].revision, "b");
        assert_eq!(revisions[1].revision, "a");
    }

    #[test]
    fn merge_combines_revisions() {
        let mut a = PackagesList::new();
        a.add_recipe(&rref("zlib/1.0#r2%20"));
        let mut b = PackagesList::new();
        b.add_recipe(&rref("zlib/1.0#r1%10"));
        b.add_recipe(&rref("bzip2/1.0#x%5"));
        a.merge(&b);
        assert_eq!(a.len(), 2);
        let (_, revisions) = a.recipes().next().unwrap();
        assert_eq!(revisions[0].revision, "r1");
    }
}
