//! Virtual filesystem over nested, content-addressed repositories.
//!
//! Paths are slash-delimited; the first segment names a mounted root and
//! the rest walk that root's tree. A `commit` entry inside a tree is a
//! repository boundary (a submodule): resolution crosses it and continues
//! in the nested repository, registering it on first sight.
//!
//! # Writes
//!
//! All writes issued during one scheduler turn are coalesced into a single
//! atomic transaction. The transaction groups writes by owning repository,
//! builds new trees, records automatic commits for uncommitted edits, and
//! propagates each new commit into its parent repository until every
//! touched root has a new `current` hash. Either every root moves or none
//! does.
//!
//! # Key Types
//!
//! - [`Vfs`] -- the coordinator and public read/write API
//! - [`RootRegistry`] / [`RepoConfig`] -- mounted repositories and their state
//! - [`MountBackend`] / [`StoreMounts`] -- where repositories live
//! - [`ChangeEvent`] -- published when a root's `current` moves
//!
//! ```no_run
//! use std::sync::Arc;
//! use arbor_store::InMemoryObjectStore;
//! use arbor_vfs::{MountKind, RepoConfig, Vfs, VfsConfig};
//!
//! # async fn demo() -> arbor_vfs::VfsResult<()> {
//! let vfs = Vfs::with_store(Arc::new(InMemoryObjectStore::new()), VfsConfig::default());
//! let root = vfs.add_root("notes", RepoConfig::new(MountKind::Empty));
//! vfs.write_file(&format!("{root}/todo.txt"), "write docs").await?;
//! assert_eq!(vfs.is_dirty(&root), Some(true));
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod config;
mod engine;
pub mod error;
pub mod mounts;
pub mod names;
pub mod notify;
pub mod paths;
pub mod registry;
mod resolver;
pub mod scheduler;

pub use config::VfsConfig;
pub use engine::WriteSet;
pub use error::{VfsError, VfsResult};
pub use mounts::{MountBackend, StoreMounts};
pub use notify::{ChangeEvent, ChangeFilter, ChangeStream};
pub use registry::{MountKind, RegistrySnapshot, RepoConfig, RootRegistry};
pub use resolver::Resolved;
pub use scheduler::{CommitHashes, Phase, Vfs};
