//! Engine error taxonomy.

use crate::config::ConfigError;
use crate::executor::ExecutionError;
use crate::graph::GraphError;
use crate::package_id::PackageIdError;
use crate::recipe::RecipeError;
use crate::store::StoreError;
use rivet_schema::{LockfileError, LockfileStrictError, ParseError, RangeError};
use thiserror::Error;

/// Aggregated binary availability failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BinaryError {
    /// Configurations rejected by their recipes, with reasons.
    #[error("There are invalid packages:\n{}", format_invalid(.0))]
    Invalid(Vec<(String, String)>),

    /// Binaries found nowhere that the build policy does not allow building.
    #[error("Missing prebuilt package for:\n{}\nTry to build locally from sources using the '--build=missing' argument", format_missing(.0))]
    Missing(Vec<String>),
}

fn format_invalid(nodes: &[(String, String)]) -> String {
    nodes
        .iter()
        .map(|(reference, reason)| format!("  {reference}: {reason}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_missing(nodes: &[String]) -> String {
    nodes
        .iter()
        .map(|reference| format!("  {reference}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Invalid `--build` arguments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid build policy: {0}")]
pub struct BuildPolicyError(pub String);

/// Any engine failure.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed reference.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Unresolvable or malformed version range.
    #[error(transparent)]
    Range(#[from] RangeError),

    /// Error recorded on the graph, made fatal.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Package id customization failure.
    #[error("Error computing package id of '{reference}': {source}")]
    PackageId {
        /// Node whose id failed.
        reference: String,
        /// Underlying error.
        #[source]
        source: PackageIdError,
    },

    /// Missing or invalid binaries.
    #[error(transparent)]
    Binary(#[from] BinaryError),

    /// Strict lockfile without a pin.
    #[error(transparent)]
    LockfileStrict(#[from] LockfileStrictError),

    /// Lockfile read/write.
    #[error(transparent)]
    Lockfile(#[from] LockfileError),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Recipe failure.
    #[error(transparent)]
    Recipe(#[from] RecipeError),

    /// Bad build policy.
    #[error(transparent)]
    BuildPolicy(#[from] BuildPolicyError),

    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Install failures.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Engine result alias.
pub type Result<T> = std::result::Result<T, Error>;
