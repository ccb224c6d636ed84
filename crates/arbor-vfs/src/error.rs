use std::sync::Arc;

use arbor_store::StoreError;
use arbor_types::EntryMode;

/// Errors from virtual filesystem operations.
///
/// `VfsError` is `Clone`: when a transaction fails, every caller whose write
/// was part of that batch receives the same error value.
#[derive(Clone, Debug, thiserror::Error)]
pub enum VfsError {
    /// No root, config, or entry exists at the path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The entry exists but has the wrong mode for the operation.
    #[error("invalid mode {mode} ({}) at {path:?}, expected {expected}", mode.name())]
    InvalidMode {
        path: String,
        mode: EntryMode,
        expected: &'static str,
    },

    /// A pending write belongs to no registered root.
    #[error("no root for path {0:?}")]
    NoRootMatch(String),

    /// `revert_to_head` on a repository that has never been committed.
    #[error("no head to revert to at {0:?}")]
    NoHeadToRevert(String),

    /// The repository that owns a path could not be located.
    #[error("missing repository for {0:?}")]
    MissingRepository(String),

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Stored data could not be interpreted (e.g. a non UTF-8 link target).
    #[error("invalid data at {path:?}: {reason}")]
    InvalidData { path: String, reason: String },

    /// Config expansion or submodule discovery failed.
    #[error("mount error for {root:?}: {reason}")]
    Mount { root: String, reason: String },

    #[error("store error: {0}")]
    Store(Arc<StoreError>),

    /// A background transaction task panicked or was cancelled.
    #[error("transaction task failed: {0}")]
    Task(String),

    /// The coordinator went away before answering.
    #[error("filesystem coordinator closed")]
    Closed,
}

impl From<StoreError> for VfsError {
    fn from(err: StoreError) -> Self {
        Self::Store(Arc::new(err))
    }
}

/// Result alias for filesystem operations.
pub type VfsResult<T> = Result<T, VfsError>;
