//! rivet - dependency graph resolution for C and C++ packages
//!
//! Thin command line over `rivet-core`. Recipes and binaries live in JSON
//! store files: the local cache under `RIVET_HOME` and one file per
//! configured remote.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.rivet/
//! ├── config.toml   # Profiles, resolver settings, remotes
//! ├── cache.json    # Local cache store
//! └── builds/       # Scratch folders of running builds
//! ```

#![allow(missing_docs)]
#![allow(clippy::doc_markdown)]

pub mod cmd;
pub mod ui;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "rivet")]
#[command(author, version, about = "rivet - dependency graph resolution for C and C++ packages")]
pub struct Cli {
    /// Configuration file (defaults to $RIVET_HOME/config.toml)
    #[arg(long, global = true, env = "RIVET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress progress output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format of commands that print a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// What to resolve: a consumer manifest or command line references.
#[derive(Debug, Clone, Args)]
pub struct GraphArgs {
    /// Consumer recipe manifest (JSON)
    #[arg(value_name = "PATH", conflicts_with_all = ["requires", "tool_requires"])]
    pub path: Option<PathBuf>,

    /// Requirement, version may be a range: zlib/[>=1.2 <2]
    #[arg(long = "requires", value_name = "REF")]
    pub requires: Vec<String>,

    /// Tool requirement, resolved in the build context
    #[arg(long = "tool-requires", value_name = "REF")]
    pub tool_requires: Vec<String>,

    /// Check remotes for newer versions and revisions
    #[arg(long)]
    pub update: bool,

    /// Lockfile to resolve against
    #[arg(long, value_name = "PATH")]
    pub lockfile: Option<PathBuf>,

    /// Allow requirements the lockfile does not pin
    #[arg(long)]
    pub lockfile_partial: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve, then download or build every missing binary
    Install {
        #[command(flatten)]
        graph: GraphArgs,
        /// Build policy: never, missing, missing:<pattern>, cascade, <pattern>, ~<pattern>
        #[arg(long = "build", short = 'b', value_name = "POLICY")]
        build: Vec<String>,
        /// Write (or update) a lockfile with the result
        #[arg(long, value_name = "PATH")]
        lockfile_out: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },
    /// Export a recipe to the cache and build its binary
    Create {
        /// Recipe manifest (JSON)
        path: PathBuf,
        /// Build policy for the dependencies
        #[arg(long = "build", short = 'b', value_name = "POLICY")]
        build: Vec<String>,
    },
    /// Inspect dependency graphs
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },
    /// Create and edit lockfiles
    Lock {
        #[command(subcommand)]
        command: LockCommands,
    },
    /// Add a recipe manifest to the cache or a remote
    Export {
        /// Recipe manifest (JSON)
        path: PathBuf,
        /// Upload to this remote instead of the local cache
        #[arg(long)]
        remote: Option<String>,
    },
    /// List recipes matching a pattern
    List {
        /// Pattern such as zlib/* or zlib/1.*
        #[arg(default_value = "*")]
        pattern: String,
        /// Search this remote instead of the local cache
        #[arg(long, short = 'r', conflicts_with = "all_remotes")]
        remote: Option<String>,
        /// Search every configured remote
        #[arg(long)]
        all_remotes: bool,
        /// Output format
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },
}

#[derive(Debug, Subcommand)]
pub enum GraphCommands {
    /// Resolve and print the graph with binary statuses
    Info {
        #[command(flatten)]
        graph: GraphArgs,
        /// Build policy used to compute binary statuses
        #[arg(long = "build", short = 'b', value_name = "POLICY")]
        build: Vec<String>,
        /// Output format
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },
    /// Print the levels in which packages can be built
    BuildOrder {
        #[command(flatten)]
        graph: GraphArgs,
        /// Build policy used to compute binary statuses
        #[arg(long = "build", short = 'b', value_name = "POLICY")]
        build: Vec<String>,
        /// Put every entry in a single level
        #[arg(long)]
        flat: bool,
    },
    /// Merge build-order files into one
    BuildOrderMerge {
        /// Build-order JSON files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum LockCommands {
    /// Resolve and write a lockfile
    Create {
        #[command(flatten)]
        graph: GraphArgs,
        /// Lockfile to write
        #[arg(long, value_name = "PATH", default_value = "rivet.lock")]
        lockfile_out: PathBuf,
        /// Drop locked entries the new graph does not use
        #[arg(long)]
        clean: bool,
    },
    /// Merge lockfiles
    Merge {
        /// Lockfiles to merge
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Merged lockfile
        #[arg(long, value_name = "PATH", default_value = "rivet.lock")]
        out: PathBuf,
    },
    /// Pin references in a lockfile without resolving
    Add {
        /// References to pin
        #[arg(long = "requires", value_name = "REF", required_unless_present = "build_requires")]
        requires: Vec<String>,
        /// References to pin in the build context
        #[arg(long = "build-requires", value_name = "REF")]
        build_requires: Vec<String>,
        /// Lockfile to edit
        #[arg(long, value_name = "PATH", default_value = "rivet.lock")]
        lockfile: PathBuf,
    },
}
