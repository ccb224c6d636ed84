//! Bounded cache of decoded commits and trees.
//!
//! Objects are immutable and keyed by content hash, so entries never need
//! invalidation; the oldest entry is evicted once the cache is full.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use arbor_store::{Commit, ObjectStore, Tree};
use arbor_types::ObjectId;

use crate::error::VfsResult;

#[derive(Clone)]
enum Cached {
    Commit(Arc<Commit>),
    Tree(Arc<Tree>),
}

struct Slots {
    map: HashMap<ObjectId, Cached>,
    order: VecDeque<ObjectId>,
}

pub(crate) struct ObjectCache {
    capacity: usize,
    slots: Mutex<Slots>,
}

impl ObjectCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Mutex::new(Slots {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("cache lock poisoned").map.len()
    }

    fn get(&self, id: &ObjectId) -> Option<Cached> {
        self.slots
            .lock()
            .expect("cache lock poisoned")
            .map
            .get(id)
            .cloned()
    }

    fn put(&self, id: ObjectId, value: Cached) {
        let mut slots = self.slots.lock().expect("cache lock poisoned");
        if slots.map.insert(id, value).is_some() {
            return;
        }
        slots.order.push_back(id);
        while slots.order.len() > self.capacity {
            if let Some(oldest) = slots.order.pop_front() {
                slots.map.remove(&oldest);
            }
        }
    }

    /// Load a commit through the cache.
    pub async fn commit(&self, store: &dyn ObjectStore, id: &ObjectId) -> VfsResult<Arc<Commit>> {
        if let Some(Cached::Commit(commit)) = self.get(id) {
            return Ok(commit);
        }
        let commit = Arc::new(store.load_commit(id).await?);
        self.put(*id, Cached::Commit(commit.clone()));
        Ok(commit)
    }

    /// Load a tree through the cache.
    pub async fn tree(&self, store: &dyn ObjectStore, id: &ObjectId) -> VfsResult<Arc<Tree>> {
        if let Some(Cached::Tree(tree)) = self.get(id) {
            return Ok(tree);
        }
        let tree = Arc::new(store.load_tree(id).await?);
        self.put(*id, Cached::Tree(tree.clone()));
        Ok(tree)
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
