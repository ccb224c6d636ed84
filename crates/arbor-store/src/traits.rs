use arbor_types::ObjectId;
use async_trait::async_trait;

use crate::builder::{build_tree, TreeAction};
use crate::error::{StoreError, StoreResult};
use crate::object::{Blob, Commit, Object, ObjectKind, StoredObject, Tree};

/// Content-addressed object store with branch refs.
///
/// Implementations provide the four raw operations; typed loading, saving,
/// and tree construction are provided on top of them.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written; the same data always produces the
///   same ID, and rewriting it is a no-op.
/// - Concurrent reads are always safe.
/// - Refs are the only mutable state.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object by its content-addressed ID.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    async fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>>;

    /// Write an object and return its content-addressed ID.
    async fn write(&self, object: &StoredObject) -> StoreResult<ObjectId>;

    /// Read the commit a ref points at, if the ref exists.
    async fn read_ref(&self, name: &str) -> StoreResult<Option<ObjectId>>;

    /// Create or move a ref.
    async fn update_ref(&self, name: &str, id: ObjectId) -> StoreResult<()>;

    /// Load and decode an object, checking its kind.
    async fn load(&self, kind: ObjectKind, id: &ObjectId) -> StoreResult<Object> {
        let stored = self.read(id).await?.ok_or(StoreError::NotFound(*id))?;
        if stored.kind != kind {
            return Err(StoreError::KindMismatch {
                id: *id,
                expected: kind,
                actual: stored.kind,
            });
        }
        Object::from_stored_object(&stored)
    }

    async fn load_blob(&self, id: &ObjectId) -> StoreResult<Blob> {
        let stored = self.read(id).await?.ok_or(StoreError::NotFound(*id))?;
        Blob::from_stored_object(&stored)
    }

    async fn load_tree(&self, id: &ObjectId) -> StoreResult<Tree> {
        let stored = self.read(id).await?.ok_or(StoreError::NotFound(*id))?;
        Tree::from_stored_object(&stored)
    }

    async fn load_commit(&self, id: &ObjectId) -> StoreResult<Commit> {
        let stored = self.read(id).await?.ok_or(StoreError::NotFound(*id))?;
        Commit::from_stored_object(&stored)
    }

    /// Encode and write any object.
    async fn save(&self, object: &Object) -> StoreResult<ObjectId> {
        let stored = object.to_stored_object()?;
        self.write(&stored).await
    }

    /// Build a new root tree by applying path-keyed actions over `base`.
    ///
    /// See [`build_tree`] for the exact semantics.
    async fn create_tree(
        &self,
        base: Option<ObjectId>,
        actions: Vec<TreeAction>,
    ) -> StoreResult<ObjectId> {
        build_tree(self, base, actions).await
    }
}
