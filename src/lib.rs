//! Directory-tree diff packages.
//!
//! [`create_package`] records how to turn one directory tree into another as
//! a single compressed package: a manifest of added, changed and removed
//! paths plus the new content for every added or changed path.
//! [`apply_package`] replays such a package onto a destination tree.
//! A package created without a prior tree is a bootstrap package that
//! replaces the destination wholesale.

pub mod apply;
pub mod archive;
pub mod compare;
pub mod create;
pub mod error;
pub mod fsutil;
pub mod manifest;
pub mod repo;
pub mod timing;

#[cfg(test)]
mod testutil;

pub use apply::{apply_package, ApplyOptions};
pub use compare::{compare_trees, TreeDiff};
pub use create::create_package;
pub use error::{DiffPackError, Result};
pub use manifest::{DiffOperation, Manifest, OpCounts, OpKind};
pub use repo::{from_repository, RepoDiffOptions};
