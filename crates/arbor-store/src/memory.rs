use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use arbor_types::ObjectId;
use async_trait::async_trait;

use crate::error::StoreResult;
use crate::object::{ObjectKind, StoredObject};
use crate::refs::validate_ref_name;
use crate::traits::ObjectStore;

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. Objects and refs are held behind
/// `RwLock`s; nothing is persisted.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectId, StoredObject>>,
    refs: RwLock<BTreeMap<String, ObjectId>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            refs: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Number of stored objects of one kind.
    pub fn count(&self, kind: ObjectKind) -> usize {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|obj| obj.kind == kind)
            .count()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.read().expect("lock poisoned").contains_key(id)
    }

    /// All refs, sorted by name.
    pub fn refs(&self) -> Vec<(String, ObjectId)> {
        self.refs
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect()
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(id).cloned())
    }

    async fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        let id = object.compute_id();
        let mut map = self.objects.write().expect("lock poisoned");
        map.entry(id).or_insert_with(|| object.clone());
        Ok(id)
    }

    async fn read_ref(&self, name: &str) -> StoreResult<Option<ObjectId>> {
        validate_ref_name(name)?;
        Ok(self.refs.read().expect("lock poisoned").get(name).copied())
    }

    async fn update_ref(&self, name: &str, id: ObjectId) -> StoreResult<()> {
        validate_ref_name(name)?;
        self.refs
            .write()
            .expect("lock poisoned")
            .insert(name.to_string(), id);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len())
            .finish()
    }
}
