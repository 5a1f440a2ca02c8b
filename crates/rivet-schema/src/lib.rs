//! Shared value types and wire formats for rivet.
//!
//! Everything in this crate is pure data: references and their grammar,
//! versions and version ranges, content identities, and the JSON shapes
//! of lockfiles, build-order files and package lists. The resolution
//! engine lives in `rivet-core`.

pub mod build_order;
pub mod hash;
pub mod lockfile;
pub mod packages_list;
pub mod range;
pub mod reference;
pub mod types;
pub mod version;

// Re-exports
pub use build_order::{BuildOrder, BuildOrderEntry};
pub use hash::{PackageId, RevisionHash};
pub use lockfile::{LockNode, Lockfile, LockfileError, LockfileStrictError, lock_key};
pub use packages_list::PackagesList;
pub use range::{RangeError, VersionRange};
pub use reference::{PackageKey, ParseError, PkgReference, RecipeReference};
pub use types::{BinaryStatus, Context};
pub use version::Version;
