//! Version range expressions.
//!
//! Supported syntax (brackets optional):
//! - `*` or empty: any version
//! - `1.2.3` / `=1.2.3` / `==1.2.3`: exact
//! - `>1.0`, `>=1.0`, `<2`, `<=2`, `!=1.5`
//! - `~1.2`: `>=1.2 <1.3`; `~1`: `>=1 <2`
//! - `^1.2.3`: `>=1.2.3 <2.0.0`; `^0.2.3`: `>=0.2.3 <0.3.0`
//! - `1.2.*` / `1.x`: wildcard components
//! - `>=1.0, <2.0` / `>=1.0 <2.0`: AND
//! - `<1.0 || >=2.0`: OR
//! - options `include_prerelease` and `loose=False` anywhere in the expression

use crate::version::Version;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing or resolving a range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// The expression is not a valid range (only raised with `loose=False`).
    #[error("Malformed version range '{range}': {reason}")]
    Malformed {
        /// The offending expression.
        range: String,
        /// What was wrong with it.
        reason: String,
    },

    /// No candidate satisfies the range.
    #[error("Version range '{range}' for '{name}' could not be resolved: no matching version")]
    NoMatch {
        /// Package the range was declared for.
        name: String,
        /// The unresolvable range.
        range: String,
    },
}

/// Comparison operator of a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `=`
    Eq,
    /// `!=`
    Ne,
}

impl Operator {
    fn as_str(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ne => "!=",
        }
    }
}

/// One `operator version` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Comparison applied to the candidate.
    pub op: Operator,
    /// Bound the candidate is compared against.
    pub version: Version,
}

impl Condition {
    fn new(op: Operator, version: &str) -> Self {
        Self {
            op,
            version: Version::new(version),
        }
    }

    /// Whether `v` satisfies this clause.
    pub fn matches(&self, v: &Version) -> bool {
        let ord = v.value_cmp(&self.version);
        match self.op {
            Operator::Gt => ord == Ordering::Greater,
            Operator::Ge => ord != Ordering::Less,
            Operator::Lt => ord == Ordering::Less,
            Operator::Le => ord != Ordering::Greater,
            Operator::Eq => ord == Ordering::Equal,
            Operator::Ne => ord != Ordering::Equal,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)
    }
}

/// A parsed version range: OR of AND-ed condition sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    branches: Vec<Vec<Condition>>,
    include_prerelease: bool,
    loose: bool,
}

impl VersionRange {
    /// A range accepting any (non-prerelease) version.
    pub fn any() -> Self {
        Self {
            branches: vec![Vec::new()],
            include_prerelease: false,
            loose: true,
        }
    }

    /// A range accepting exactly `version`.
    pub fn exact(version: &Version) -> Self {
        Self {
            branches: vec![vec![Condition {
                op: Operator::Eq,
                version: version.clone(),
            }]],
            include_prerelease: version.is_prerelease(),
            loose: true,
        }
    }

    /// Whether `text` looks like a range rather than a plain version.
    pub fn is_range_expr(text: &str) -> bool {
        text.starts_with('[') && text.ends_with(']')
    }

    /// Parse a range expression.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::Malformed`] when `loose=False` is set and a
    /// condition cannot be parsed. Loose ranges drop such conditions with
    /// a warning.
    pub fn parse(expr: &str) -> Result<Self, RangeError> {
        let trimmed = expr.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(trimmed);

        let branch_tokens: Vec<Vec<String>> = inner.split("||").map(tokenize).collect();

        // Options are global, so read them before validating conditions
        let mut include_prerelease = false;
        let mut loose = true;
        for token in branch_tokens.iter().flatten() {
            if let Some(value) = option_value(token, "include_prerelease") {
                include_prerelease = value;
            } else if let Some(value) = option_value(token, "loose") {
                loose = value;
            }
        }

        let mut branches = Vec::new();
        for tokens in branch_tokens {
            let mut conditions = Vec::new();
            for token in tokens {
                if option_value(&token, "include_prerelease").is_some()
                    || option_value(&token, "loose").is_some()
                {
                    continue;
                }
                match parse_condition(&token) {
                    Ok(mut parsed) => conditions.append(&mut parsed),
                    Err(reason) if loose => {
                        tracing::warn!("Ignoring condition '{token}' in range '{expr}': {reason}");
                    }
                    Err(reason) => {
                        return Err(RangeError::Malformed {
                            range: expr.to_string(),
                            reason,
                        });
                    }
                }
            }
            branches.push(conditions);
        }

        Ok(Self {
            branches,
            include_prerelease,
            loose,
        })
    }

    /// Whether prerelease versions are eligible without an explicit prerelease bound.
    pub fn include_prerelease(&self) -> bool {
        self.include_prerelease
    }

    /// Whether malformed conditions are tolerated.
    pub fn is_loose(&self) -> bool {
        self.loose
    }

    /// Whether `version` satisfies at least one OR-branch.
    pub fn contains(&self, version: &Version) -> bool {
        self.branches
            .iter()
            .any(|branch| self.branch_contains(branch, version))
    }

    fn branch_contains(&self, branch: &[Condition], version: &Version) -> bool {
        if version.is_prerelease() && !self.include_prerelease {
            // Exact-match escape: a bound that itself targets a prerelease
            // of the same release admits prereleases of that release.
            let same_release = |c: &Condition| {
                c.version.is_prerelease()
                    && match (c.version.semver(), version.semver()) {
                        (Some(a), Some(b)) => (a.major, a.minor, a.patch) == (b.major, b.minor, b.patch),
                        _ => c.version.components() == version.components(),
                    }
            };
            if !branch.iter().any(same_release) {
                return false;
            }
        }
        branch.iter().all(|c| c.matches(version))
    }

    /// Pick the greatest candidate satisfying the range.
    ///
    /// Non-semver candidates sort below all semver ones, so they are only
    /// chosen when no semver candidate qualifies.
    pub fn best_match<'a>(&self, candidates: &'a [Version]) -> Option<&'a Version> {
        candidates
            .iter()
            .filter(|v| {
                if !v.is_semver() {
                    tracing::debug!("Candidate version '{v}' is not semver");
                }
                self.contains(v)
            })
            .max()
    }

    /// Conjunction of two ranges.
    pub fn intersection(&self, other: &Self) -> Self {
        let mut branches = Vec::with_capacity(self.branches.len() * other.branches.len());
        for left in &self.branches {
            for right in &other.branches {
                let mut combined = left.clone();
                combined.extend(right.iter().cloned());
                branches.push(combined);
            }
        }
        Self {
            branches,
            include_prerelease: self.include_prerelease && other.include_prerelease,
            loose: self.loose && other.loose,
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let branches: Vec<String> = self
            .branches
            .iter()
            .map(|branch| {
                if branch.is_empty() {
                    "*".to_string()
                } else {
                    branch.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
                }
            })
            .collect();
        write!(f, "[{}", branches.join(" || "))?;
        if self.include_prerelease {
            write!(f, ", include_prerelease")?;
        }
        if !self.loose {
            write!(f, ", loose=False")?;
        }
        write!(f, "]")
    }
}

/// Split a branch on commas and whitespace, gluing bare operators to the
/// version that follows them (`>= 1.0` is one condition).
fn tokenize(branch: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut pending_op: Option<String> = None;
    for piece in branch.split(|c: char| c == ',' || c.is_whitespace()) {
        if piece.is_empty() {
            continue;
        }
        if piece.chars().all(|c| matches!(c, '<' | '>' | '=' | '!' | '~' | '^')) {
            pending_op = Some(pending_op.unwrap_or_default() + piece);
            continue;
        }
        match pending_op.take() {
            Some(op) => tokens.push(format!("{op}{piece}")),
            None => tokens.push(piece.to_string()),
        }
    }
    if let Some(op) = pending_op {
        tokens.push(op);
    }
    tokens
}

fn option_value(token: &str, name: &str) -> Option<bool> {
    let rest = token.strip_prefix(name)?;
    if rest.is_empty() {
        return Some(true);
    }
    let value = rest.strip_prefix('=')?;
    Some(!matches!(value.to_ascii_lowercase().as_str(), "false" | "0" | "no"))
}

fn parse_condition(token: &str) -> Result<Vec<Condition>, String> {
    const OPERATORS: [(&str, Option<Operator>); 9] = [
        (">=", Some(Operator::Ge)),
        ("<=", Some(Operator::Le)),
        ("==", Some(Operator::Eq)),
        ("!=", Some(Operator::Ne)),
        (">", Some(Operator::Gt)),
        ("<", Some(Operator::Lt)),
        ("=", Some(Operator::Eq)),
        ("~", None),
        ("^", None),
    ];

    if matches!(token, "*" | "x" | "X") {
        return Ok(Vec::new());
    }

    let (prefix, op, version) = OPERATORS
        .iter()
        .find_map(|(prefix, op)| token.strip_prefix(prefix).map(|rest| (*prefix, *op, rest)))
        .unwrap_or(("", Some(Operator::Eq), token));

    validate_version(version)?;

    let components: Vec<&str> = version
        .split(['-', '+'])
        .next()
        .unwrap_or_default()
        .split('.')
        .collect();
    let wildcard = components.iter().position(|c| matches!(*c, "*" | "x" | "X"));

    match (prefix, wildcard) {
        ("~", _) => {
            let numbers = numeric(&components)?;
            let bump_at = if numbers.len() == 1 { 0 } else { 1 };
            Ok(vec![
                Condition::new(Operator::Ge, version),
                Condition::new(Operator::Lt, &bump(&numbers, bump_at)?),
            ])
        }
        ("^", _) => {
            let numbers = numeric(&components)?;
            let bump_at = numbers
                .iter()
                .position(|n| *n != 0)
                .unwrap_or(numbers.len() - 1);
            Ok(vec![
                Condition::new(Operator::Ge, version),
                Condition::new(Operator::Lt, &bump(&numbers, bump_at)?),
            ])
        }
        (_, Some(0)) => Ok(Vec::new()),
        ("" | "=" | "==", Some(at)) => {
            let numbers = numeric(&components[..at])?;
            Ok(vec![
                Condition::new(Operator::Ge, &join(&numbers)),
                Condition::new(Operator::Lt, &bump(&numbers, at - 1)?),
            ])
        }
        (_, Some(_)) => Err(format!("wildcard not allowed with operator '{prefix}'")),
        (_, None) => {
            let op = op.ok_or_else(|| format!("operator '{prefix}' needs a version"))?;
            Ok(vec![Condition::new(op, version)])
        }
    }
}

fn validate_version(version: &str) -> Result<(), String> {
    if version.is_empty() {
        return Err("missing version".to_string());
    }
    let valid = version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_' | '*'));
    if !valid {
        return Err(format!("invalid characters in '{version}'"));
    }
    let has_wildcard = version.split('.').any(|c| matches!(c, "*" | "x" | "X"));
    if !has_wildcard && !Version::new(version).is_semver() {
        return Err(format!("'{version}' is not a semver-like version"));
    }
    Ok(())
}

fn numeric(components: &[&str]) -> Result<Vec<u64>, String> {
    if components.is_empty() {
        return Err("missing version".to_string());
    }
    components
        .iter()
        .map(|c| c.parse::<u64>().map_err(|_| format!("'{c}' is not numeric")))
        .collect()
}

fn bump(numbers: &[u64], at: usize) -> Result<String, String> {
    let mut out: Vec<u64> = numbers[..=at].to_vec();
    out[at] = out[at]
        .checked_add(1)
        .ok_or_else(|| format!("version component {} has no upper bound", out[at]))?;
    Ok(join(&out))
}

fn join(numbers: &[u64]) -> String {
    numbers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(list: &[&str]) -> Vec<Version> {
        list.iter().map(|v| Version::new(v)).collect()
    }

    fn best(range: &str, list: &[&str]) -> Option<String> {
        let candidates = versions(list);
        VersionRange::parse(range)
            .unwrap()
            .best_match(&candidates)
            .map(ToString::to_string)
    }

    #[test]
    fn comma_separated_and() {
        assert_eq!(
            best(">=0.1,<2.0", &["0.5", "1.0", "1.1", "2.0"]),
            Some("1.1".to_string())
        );
    }

    #[test]
    fn bracketed_with_spaces() {
        assert_eq!(best("[>=1.0 <2]", &["0.9", "1.5", "2.0"]), Some("1.5".into()));
        assert_eq!(best("[>= 1.0, < 2]", &["0.9", "1.5", "2.0"]), Some("1.5".into()));
    }

    #[test]
    fn or_branches() {
        assert_eq!(best("<1.0 || >=3.0", &["0.5", "2.0"]), Some("0.5".into()));
        assert_eq!(best("<1.0 || >=3.0", &["0.5", "2.0", "3.1"]), Some("3.1".into()));
    }

    #[test]
    fn tilde_and_caret() {
        assert_eq!(best("~1.1", &["1.0", "1.1.5", "1.2"]), Some("1.1.5".into()));
        assert_eq!(best("~1", &["1.9", "2.0"]), Some("1.9".into()));
        assert_eq!(best("^1.2", &["1.9.9", "2.0"]), Some("1.9.9".into()));
        assert_eq!(best("^0.2.3", &["0.2.9", "0.3.0"]), Some("0.2.9".into()));
        assert_eq!(best("^0.0.3", &["0.0.3", "0.0.4"]), Some("0.0.3".into()));
    }

    #[test]
    fn wildcards() {
        assert_eq!(best("1.2.*", &["1.2.9", "1.3.0"]), Some("1.2.9".into()));
        assert_eq!(best("1.x", &["1.9", "2.0"]), Some("1.9".into()));
        assert_eq!(best("*", &["1.0", "2.0"]), Some("2.0".into()));
        assert_eq!(best("[]", &["1.0"]), Some("1.0".into()));
    }

    #[test]
    fn prereleases_need_opt_in() {
        assert_eq!(best(">=1.0", &["1.0", "2.0-rc.1"]), Some("1.0".into()));
        assert_eq!(
            best(">=1.0, include_prerelease", &["1.0", "2.0-rc.1"]),
            Some("2.0-rc.1".into())
        );
    }

    #[test]
    fn prerelease_bound_escape() {
        assert_eq!(
            best(">=2.0-rc.1", &["1.0", "2.0-rc.2"]),
            Some("2.0-rc.2".into())
        );
        // prereleases of other releases stay excluded
        assert_eq!(best(">=2.0-rc.1", &["3.0-rc.1"]), None);
    }

    #[test]
    fn no_match() {
        assert_eq!(best(">5", &["1.0", "2.0"]), None);
    }

    #[test]
    fn non_semver_only_when_alone() {
        assert_eq!(best("<3", &["1.2.3.4", "2.0"]), Some("2.0".into()));
        assert_eq!(best("<3", &["1.2.3.4"]), Some("1.2.3.4".into()));
        assert_eq!(best("*", &["system"]), Some("system".into()));
    }

    #[test]
    fn strict_ranges_reject_garbage() {
        assert!(matches!(
            VersionRange::parse("[>=1.0 <abc$, loose=False]"),
            Err(RangeError::Malformed { .. })
        ));
        // loose ranges drop the bad condition
        let loose = VersionRange::parse("[>=1.0 <abc$]").unwrap();
        assert!(loose.contains(&Version::new("9.0")));
    }

    #[test]
    fn largest_component_cannot_be_bumped() {
        for expr in ["~18446744073709551615", "^18446744073709551615", "18446744073709551615.*"] {
            assert!(
                matches!(
                    VersionRange::parse(&format!("[{expr}, loose=False]")),
                    Err(RangeError::Malformed { .. })
                ),
                "{expr}"
            );
            // loose ranges drop the unbounded condition
            let loose = VersionRange::parse(&format!("[>=1.0 {expr}]")).unwrap();
            assert!(loose.contains(&Version::new("2.0")));
            assert!(!loose.contains(&Version::new("0.5")));
        }
    }

    #[test]
    fn intersection_is_conjunction() {
        let a = VersionRange::parse(">=1.0").unwrap();
        let b = VersionRange::parse("<1.5").unwrap();
        let both = a.intersection(&b);
        assert!(both.contains(&Version::new("1.4")));
        assert!(!both.contains(&Version::new("1.5")));
        assert!(!both.contains(&Version::new("0.9")));
    }

    #[test]
    fn exact_matches_padded_value() {
        let range = VersionRange::exact(&Version::new("1.0"));
        assert!(range.contains(&Version::new("1.0.0")));
        assert!(!range.contains(&Version::new("1.0.1")));
    }

    #[test]
    fn display_is_canonical() {
        let range = VersionRange::parse(">=1.0, <2.0 || 3.*").unwrap();
        assert_eq!(range.to_string(), "[>=1.0 <2.0 || >=3 <4]");
    }
}
