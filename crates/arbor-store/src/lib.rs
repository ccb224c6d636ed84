//! Content-addressed object storage for Arbor.
//!
//! Every piece of data -- file contents, directory listings, commits -- is
//! stored as an immutable object identified by its domain-separated BLAKE3
//! hash. Branch refs are the only mutable state a store keeps.
//!
//! # Object Types
//!
//! - [`Blob`] -- raw content (file contents, symlink targets)
//! - [`Tree`] -- sorted listing mapping names to `{mode, hash}` entries
//! - [`Commit`] -- a tree plus parent commits, author, and message
//!
//! # Storage Backends
//!
//! All backends implement the async [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsObjectStore`] -- loose objects and refs under a directory
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written (content-addressing guarantees this).
//! 2. Writes are idempotent: writing existing content returns the same id.
//! 3. Tree construction ([`ObjectStore::create_tree`]) is keyed by path, so the
//!    order of actions never changes the resulting hash.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod builder;
pub mod error;
pub mod fs;
pub mod memory;
pub mod object;
pub mod refs;
pub mod traits;

pub use builder::{build_tree, TreeAction};
pub use error::{StoreError, StoreResult};
pub use fs::FsObjectStore;
pub use memory::InMemoryObjectStore;
pub use object::{Blob, Commit, Object, ObjectKind, Signature, StoredObject, Tree, TreeEntry};
pub use refs::validate_ref_name;
pub use traits::ObjectStore;
