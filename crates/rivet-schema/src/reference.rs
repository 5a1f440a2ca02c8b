//! Recipe and package references.
//!
//! A recipe reference is written `name/version[@user[/channel]][#revision][%timestamp]`.
//! A package reference appends `:package_id[#package_revision][%timestamp]`.

use crate::hash::PackageId;
use crate::range::{RangeError, VersionRange};
use crate::version::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

const MAX_NAME_LEN: usize = 101;

/// A reference string that does not follow the grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid reference '{input}': {reason}")]
pub struct ParseError {
    /// The rejected text.
    pub input: String,
    /// What was wrong with it.
    pub reason: String,
}

impl ParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Conflict identity of a recipe: everything but the version.
///
/// Two requirements with the same key in the same resolution scope must
/// end up on the same graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageKey {
    /// Recipe name.
    pub name: String,
    /// Optional user namespace.
    pub user: Option<String>,
    /// Optional channel.
    pub channel: Option<String>,
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        write_user_channel(f, self.user.as_deref(), self.channel.as_deref())
    }
}

/// Reference to a recipe, optionally pinned to one revision.
#[derive(Debug, Clone)]
pub struct RecipeReference {
    /// Recipe name (lowercase).
    pub name: String,
    /// Version, or a bracketed version range in requirements.
    pub version: Version,
    /// Optional user namespace.
    pub user: Option<String>,
    /// Optional channel (only with a user).
    pub channel: Option<String>,
    /// Recipe revision, once content has been exported.
    pub revision: Option<String>,
    /// Creation time of the revision (Unix seconds).
    pub timestamp: Option<i64>,
}

impl RecipeReference {
    /// Reference with only a name and a version.
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: Version::new(version),
            user: None,
            channel: None,
            revision: None,
            timestamp: None,
        }
    }

    /// Builder-style user/channel setter.
    #[must_use]
    pub fn with_user_channel(mut self, user: &str, channel: Option<&str>) -> Self {
        self.user = Some(user.to_string());
        self.channel = channel.map(ToString::to_string);
        self
    }

    /// Builder-style revision setter.
    #[must_use]
    pub fn with_revision(mut self, revision: &str, timestamp: Option<i64>) -> Self {
        self.revision = Some(revision.to_string());
        self.timestamp = timestamp;
        self
    }

    /// Parse `name/version[@user[/channel]][#revision][%timestamp]`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when a field is missing or uses characters
    /// outside the allowed identifier set.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let err = |reason: &str| ParseError::new(text, reason);

        let (name, rest) = text
            .split_once('/')
            .ok_or_else(|| err("expected 'name/version'"))?;

        let (version, mut rest) = if rest.starts_with('[') {
            let end = rest
                .find(']')
                .ok_or_else(|| err("unterminated version range"))?;
            rest.split_at(end + 1)
        } else {
            let end = rest.find(['@', '#', '%']).unwrap_or(rest.len());
            rest.split_at(end)
        };

        let mut timestamp = None;
        if let Some((head, ts)) = rest.rsplit_once('%') {
            let ts = ts
                .parse::<i64>()
                .map_err(|_| err("timestamp must be an integer"))?;
            timestamp = Some(ts);
            rest = head;
        }

        let mut revision = None;
        if let Some((head, rev)) = rest.split_once('#') {
            if rev.is_empty() || !rev.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(err("revision must be alphanumeric"));
            }
            revision = Some(rev.to_string());
            rest = head;
        }

        let (user, channel) = match rest.strip_prefix('@') {
            None if rest.is_empty() => (None, None),
            None => return Err(err("unexpected characters after version")),
            Some("") => (None, None),
            Some(uc) => match uc.split_once('/') {
                Some((u, c)) => (Some(u), Some(c)),
                None => (Some(uc), None),
            },
        };

        if !valid_name(name) {
            return Err(err("name must match [a-z0-9_][a-z0-9_+.-]* (max 101 chars)"));
        }
        if !(valid_field(version) || is_bracketed(version)) {
            return Err(err("invalid version"));
        }
        if user.is_some_and(|u| !valid_field(u)) {
            return Err(err("invalid user"));
        }
        if channel.is_some_and(|c| !valid_field(c)) {
            return Err(err("invalid channel"));
        }

        Ok(Self {
            name: name.to_string(),
            version: Version::new(version),
            user: user.map(ToString::to_string),
            channel: channel.map(ToString::to_string),
            revision,
            timestamp,
        })
    }

    /// Conflict key (name, user, channel).
    pub fn key(&self) -> PackageKey {
        PackageKey {
            name: self.name.clone(),
            user: self.user.clone(),
            channel: self.channel.clone(),
        }
    }

    /// Same name, version, user and channel, regardless of revision.
    pub fn same_package(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.user == other.user
            && self.channel == other.channel
    }

    /// Whether the version field is a bracketed range.
    pub fn is_range(&self) -> bool {
        is_bracketed(self.version.as_str())
    }

    /// The version range of this reference, if it declares one.
    ///
    /// # Errors
    ///
    /// Propagates [`RangeError::Malformed`] from strict ranges.
    pub fn version_range(&self) -> Option<Result<VersionRange, RangeError>> {
        self.is_range()
            .then(|| VersionRange::parse(self.version.as_str()))
    }

    /// Copy without revision and timestamp.
    #[must_use]
    pub fn without_revision(&self) -> Self {
        Self {
            revision: None,
            timestamp: None,
            ..self.clone()
        }
    }

    /// Canonical form including the timestamp.
    pub fn repr_full(&self) -> String {
        match self.timestamp {
            Some(ts) => format!("{self}%{ts}"),
            None => self.to_string(),
        }
    }

    /// Glob match against a reference pattern.
    ///
    /// Patterns are matched against both `name/version@user/channel` and
    /// the form with `#revision`. A bare name means `name/*`, a trailing
    /// `@` restricts to references without user/channel, `&` stands for
    /// the consumer, and a leading `~` or `!` negates.
    pub fn matches(&self, pattern: &str, is_consumer: bool) -> bool {
        let (negate, pattern) = match pattern.strip_prefix(['~', '!']) {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };

        let matched = if pattern == "&" {
            is_consumer
        } else {
            self.glob_matches(pattern)
        };
        matched != negate
    }

    fn glob_matches(&self, pattern: &str) -> bool {
        let mut pattern = pattern.to_string();
        let mut no_user_channel = false;
        if let Some(stripped) = pattern.strip_suffix('@') {
            pattern = stripped.to_string();
            no_user_channel = true;
        } else if pattern.contains("@#") {
            pattern = pattern.replacen("@#", "#", 1);
            no_user_channel = true;
        }
        if no_user_channel && (self.user.is_some() || self.channel.is_some()) {
            return false;
        }
        if !pattern.contains('/') {
            pattern = match pattern.split_once('#') {
                Some((name, rev)) => format!("{name}/*#{rev}"),
                None => format!("{pattern}/*"),
            };
        }

        let plain = self.without_revision().to_string();
        let full = self.to_string();
        match glob::Pattern::new(&pattern) {
            Ok(glob) => {
                let opts = glob::MatchOptions {
                    case_sensitive: true,
                    require_literal_separator: false,
                    require_literal_leading_dot: false,
                };
                glob.matches_with(&plain, opts) || glob.matches_with(&full, opts)
            }
            Err(_) => pattern == plain || pattern == full,
        }
    }
}

fn valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    s.len() <= MAX_NAME_LEN
        && (first.is_ascii_lowercase() || first.is_ascii_digit() || first == '_')
        && chars.all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '+' | '.' | '-')
        })
}

fn valid_field(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphanumeric() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '.' | '-'))
}

fn is_bracketed(s: &str) -> bool {
    s.len() >= 2 && s.starts_with('[') && s.ends_with(']')
}

fn write_user_channel(
    f: &mut fmt::Formatter<'_>,
    user: Option<&str>,
    channel: Option<&str>,
) -> fmt::Result {
    match (user, channel) {
        (Some(u), Some(c)) => write!(f, "@{u}/{c}"),
        (Some(u), None) => write!(f, "@{u}"),
        (None, Some(c)) => write!(f, "@_/{c}"),
        (None, None) => Ok(()),
    }
}

impl fmt::Display for RecipeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)?;
        write_user_channel(f, self.user.as_deref(), self.channel.as_deref())?;
        if let Some(rev) = &self.revision {
            write!(f, "#{rev}")?;
        }
        Ok(())
    }
}

impl PartialEq for RecipeReference {
    fn eq(&self, other: &Self) -> bool {
        self.same_package(other) && self.revision == other.revision
    }
}

impl Eq for RecipeReference {}

impl Hash for RecipeReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
        self.user.hash(state);
        self.channel.hash(state);
        self.revision.hash(state);
    }
}

impl Ord for RecipeReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.user.cmp(&other.user))
            .then_with(|| self.channel.cmp(&other.channel))
            .then_with(|| self.revision.cmp(&other.revision))
    }
}

impl PartialOrd for RecipeReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::str::FromStr for RecipeReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RecipeReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.repr_full())
    }
}

impl<'de> Deserialize<'de> for RecipeReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Reference to one binary package of a recipe revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgReference {
    /// The recipe reference; always carries a revision.
    pub rref: RecipeReference,
    /// Binary configuration identity.
    pub package_id: PackageId,
    /// Package revision, once the binary exists.
    pub revision: Option<String>,
    /// Creation time of the package revision (Unix seconds).
    pub timestamp: Option<i64>,
}

impl PkgReference {
    /// Build a package reference.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the recipe reference has no revision.
    pub fn new(rref: RecipeReference, package_id: PackageId) -> Result<Self, ParseError> {
        if rref.revision.is_none() {
            return Err(ParseError::new(
                &rref.to_string(),
                "package references require a recipe revision",
            ));
        }
        Ok(Self {
            rref,
            package_id,
            revision: None,
            timestamp: None,
        })
    }

    /// Builder-style package revision setter.
    #[must_use]
    pub fn with_revision(mut self, revision: &str, timestamp: Option<i64>) -> Self {
        self.revision = Some(revision.to_string());
        self.timestamp = timestamp;
        self
    }

    /// Parse `rref:package_id[#package_revision][%timestamp]`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when the colon or the recipe revision is
    /// missing, or a part is malformed.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let (rref, pkg) = text
            .split_once(':')
            .ok_or_else(|| ParseError::new(text, "expected 'reference:package_id'"))?;
        let rref = RecipeReference::parse(rref)?;

        let (pkg, timestamp) = match pkg.rsplit_once('%') {
            Some((head, ts)) => {
                let ts = ts
                    .parse::<i64>()
                    .map_err(|_| ParseError::new(text, "timestamp must be an integer"))?;
                (head, Some(ts))
            }
            None => (pkg, None),
        };
        let (package_id, revision) = match pkg.split_once('#') {
            Some((_, rev)) if rev.is_empty() || !rev.chars().all(|c| c.is_ascii_alphanumeric()) => {
                return Err(ParseError::new(text, "package revision must be alphanumeric"));
            }
            Some((id, rev)) => (id, Some(rev.to_string())),
            None => (pkg, None),
        };
        if package_id.is_empty() || !package_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ParseError::new(text, "invalid package id"));
        }

        let mut pref = Self::new(rref, PackageId::new(package_id))
            .map_err(|e| ParseError::new(text, e.reason))?;
        pref.revision = revision;
        pref.timestamp = timestamp;
        Ok(pref)
    }

    /// Canonical form including the timestamp.
    pub fn repr_full(&self) -> String {
        match self.timestamp {
            Some(ts) => format!("{self}%{ts}"),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for PkgReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.rref, self.package_id)?;
        if let Some(rev) = &self.revision {
            write!(f, "#{rev}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for PkgReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PkgReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.repr_full())
    }
}

impl<'de> Deserialize<'de> for PkgReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
