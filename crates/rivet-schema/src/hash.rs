use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of one binary configuration of a recipe.
///
/// Computed as the BLAKE3 hash of the canonical package info dump. The
/// special value `unknown` marks an identity that cannot be computed yet
/// because a dependency's package revision is still to be produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    const UNKNOWN: &'static str = "unknown";

    /// Wrap an existing identity string (from a store or a lockfile).
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Compute the identity of a canonical info dump.
    pub fn compute(data: &[u8]) -> Self {
        Self(blake3::hash(data).to_hex().to_string())
    }

    /// The placeholder for a not-yet-computable identity.
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    /// Whether this is the `unknown` placeholder.
    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    /// Return the inner hex string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PackageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Content-derived revision of a recipe or a package.
///
/// SHA-256 over the content it identifies, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionHash(String);

impl RevisionHash {
    /// Hash arbitrary content.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    /// Return the inner hex string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the owned hex string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for RevisionHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
