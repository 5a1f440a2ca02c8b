//! Recipe versions.
//!
//! Versions are free-form strings. Most of them are semver-like
//! (`1`, `1.2`, `1.2.3`, `1.2.3-rc.1+build`) and are ordered as semver
//! after padding missing components with zero. The rest sort below every
//! semver version and are compared by dotted segments.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// A recipe version string.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    semver: Option<semver::Version>,
}

impl Version {
    /// Create a new version from the given string (stored as-is).
    pub fn new(v: &str) -> Self {
        Self {
            raw: v.to_string(),
            semver: normalize(v),
        }
    }

    /// Return the version string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this version parses as semver after normalization.
    pub fn is_semver(&self) -> bool {
        self.semver.is_some()
    }

    /// Normalized semver form, when available.
    pub fn semver(&self) -> Option<&semver::Version> {
        self.semver.as_ref()
    }

    /// Whether the version carries a prerelease tag.
    pub fn is_prerelease(&self) -> bool {
        match &self.semver {
            Some(v) => !v.pre.is_empty(),
            None => self.raw.contains('-'),
        }
    }

    /// Dotted components of the release part (before `-` or `+`).
    pub fn components(&self) -> Vec<&str> {
        let core = self
            .raw
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        core.split('.').collect()
    }

    /// Compare by value only: `1.0` and `1.0.0` are the same version.
    ///
    /// Used by range checks. [`Ord`] additionally breaks value ties on
    /// the raw string so that it stays consistent with [`Eq`].
    pub fn value_cmp(&self, other: &Self) -> Ordering {
        match (&self.semver, &other.semver) {
            (Some(a), Some(b)) => a.cmp_precedence(b),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => cmp_segments(&self.raw, &other.raw),
        }
    }

    /// Value equality (see [`Version::value_cmp`]).
    pub fn value_eq(&self, other: &Self) -> bool {
        self.value_cmp(other) == Ordering::Equal
    }
}

/// Pad `1` / `1.2` to three components and parse as semver.
fn normalize(v: &str) -> Option<semver::Version> {
    let split_at = v.find(['-', '+']).unwrap_or(v.len());
    let (core, rest) = v.split_at(split_at);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.parse::<u64>().is_err()) {
        return None;
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(rest);
    semver::Version::parse(&padded).ok()
}

fn cmp_segments(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(n), Ok(m)) => n.cmp(&m),
                    (Ok(_), Err(_)) => Ordering::Greater,
                    (Err(_), Ok(_)) => Ordering::Less,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value_cmp(other)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl PartialEq<str> for Version {
    fn eq(&self, other: &str) -> bool {
        self.raw == other
    }
}

impl PartialEq<&str> for Version {
    fn eq(&self, other: &&str) -> bool {
        self.raw == *other
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(&s))
    }
}
