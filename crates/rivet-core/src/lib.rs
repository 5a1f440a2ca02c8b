//! Dependency graph resolution and binary analysis for rivet.
//!
//! A [`Session`] carries the configuration, the cache and remote stores,
//! the recipe loader and the reporter. From a [`GraphRoot`] it expands a
//! [`DepsGraph`], computes package ids, decides the binary status of every
//! node, and installs the missing binaries level by level.

pub mod binaries;
pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod install_order;
pub mod installer;
pub mod lock;
pub mod package_id;
pub mod paths;
pub mod range_resolver;
pub mod recipe;
pub mod requirement;
pub mod session;
pub mod store;

pub mod reporter;

pub use binaries::{BinaryResolver, BuildPolicy, check_binaries};
pub use builder::{GraphBuilder, GraphOptions, GraphRoot};
pub use config::Config;
pub use error::{Error, Result};
pub use graph::{DepsGraph, GraphError, Node, NodeId, RecipeKind};
pub use install_order::InstallOrder;
pub use reporter::{NullReporter, Reporter, TracingReporter};
pub use session::{InstallOptions, Session};
