//! Foundation types for Arbor.
//!
//! Every other Arbor crate depends on `arbor-types`. The types here are plain
//! values: they carry no I/O and no interior mutability.
//!
//! # Key Types
//!
//! - [`ObjectId`]: Content-addressed identifier (domain-separated BLAKE3 hash)
//! - [`ContentHasher`]: Hasher that produces object ids per object kind
//! - [`EntryMode`]: Mode of a tree entry (tree, commit, file, executable, symlink)
//! - [`Entry`]: An immutable `{mode, hash}` pair stored at a path

pub mod entry;
pub mod error;
pub mod hasher;
pub mod object;

pub use entry::{Entry, EntryMode};
pub use error::TypeError;
pub use hasher::ContentHasher;
pub use object::ObjectId;
