use serde::{Deserialize, Serialize};
use std::fmt;

/// The resolution space a node lives in.
///
/// Host nodes are built for the target machine; build nodes are tools
/// that run on the machine doing the building. The two contexts resolve
/// versions independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    /// Target machine (default).
    #[default]
    Host,
    /// Machine running the build.
    Build,
}

impl Context {
    /// Lowercase name used in keys and output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Build => "build",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary availability of a graph node.
///
/// Nodes start as `Unknown`. The graph builder never assigns a binary
/// state; the binary analysis assigns exactly one of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum BinaryStatus {
    /// Not evaluated yet.
    #[default]
    Unknown,
    /// Package is used from a local editable folder.
    Editable,
    /// Root recipe being consumed (never packaged).
    Consumer,
    /// Synthetic root created from command line requirements.
    Virtual,
    /// Provided by the system, never built.
    Platform,
    /// Binary already present in the local cache.
    Cache,
    /// Binary must be downloaded from a remote.
    Download,
    /// Binary must be built from source.
    Build,
    /// No binary anywhere and the build policy does not allow building.
    Missing,
    /// The configuration was rejected.
    Invalid,
    /// Binary not needed by this install.
    Skip,
    /// Binary in cache but a remote holds a newer revision.
    Update,
}

impl BinaryStatus {
    /// Whether the executor has work to do for this status.
    pub fn needs_action(self) -> bool {
        matches!(self, Self::Download | Self::Update | Self::Build)
    }

    /// Whether a usable binary was located (locally or remotely).
    pub fn is_available(self) -> bool {
        matches!(self, Self::Cache | Self::Download | Self::Update)
    }
}

impl fmt::Display for BinaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Editable => "Editable",
            Self::Consumer => "Consumer",
            Self::Virtual => "Virtual",
            Self::Platform => "Platform",
            Self::Cache => "Cache",
            Self::Download => "Download",
            Self::Build => "Build",
            Self::Missing => "Missing",
            Self::Invalid => "Invalid",
            Self::Skip => "Skip",
            Self::Update => "Update",
        };
        f.write_str(s)
    }
}
