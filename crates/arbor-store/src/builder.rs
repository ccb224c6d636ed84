//! Path-keyed tree construction.
//!
//! [`build_tree`] turns a flat list of `{path, entry}` actions into a new root
//! tree. It walks directories top-down once to find base subtrees and then
//! rewrites them bottom-up, so nesting depth never grows the call stack.

use std::collections::BTreeMap;

use arbor_types::{Entry, EntryMode, ObjectId};
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::object::{Object, Tree, TreeEntry};
use crate::traits::ObjectStore;

/// One change to apply: set the entry at `path`, or delete it when `entry`
/// is `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeAction {
    pub path: String,
    pub entry: Option<Entry>,
}

impl TreeAction {
    pub fn set(path: impl Into<String>, entry: Entry) -> Self {
        Self {
            path: path.into(),
            entry: Some(entry),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entry: None,
        }
    }
}

type Edits = BTreeMap<String, Option<Entry>>;

fn split_parent(dir: &str) -> (&str, &str) {
    match dir.rfind('/') {
        Some(i) => (&dir[..i], &dir[i + 1..]),
        None => ("", dir),
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Apply `actions` over the tree `base` (or an empty tree) and return the new
/// root tree id.
///
/// - Intermediate directories are created as needed.
/// - Directories left empty by deletions are removed from their parent; the
///   root tree is always written, even when empty.
/// - Deleting a path that does not exist is a no-op.
/// - A path that descends through an existing non-tree entry is rejected,
///   unless an action in the same batch replaces that entry.
/// - When the same path appears more than once, the last action wins.
pub async fn build_tree<S>(
    store: &S,
    base: Option<ObjectId>,
    actions: Vec<TreeAction>,
) -> StoreResult<ObjectId>
where
    S: ObjectStore + ?Sized,
{
    // directory path -> edits to its direct children
    let mut edits: BTreeMap<String, Edits> = BTreeMap::new();
    edits.insert(String::new(), Edits::new());

    for action in actions {
        let segments: Vec<&str> = action.path.split('/').collect();
        if segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
            return Err(StoreError::InvalidPath {
                path: action.path.clone(),
                reason: "empty or relative segment".into(),
            });
        }
        let (name, parents) = segments
            .split_last()
            .ok_or_else(|| StoreError::InvalidPath {
                path: action.path.clone(),
                reason: "empty path".into(),
            })?;
        let mut dir = String::new();
        for segment in parents {
            dir = join(&dir, segment);
            edits.entry(dir.clone()).or_default();
        }
        edits
            .entry(dir)
            .or_default()
            .insert((*name).to_string(), action.entry);
    }

    // Top-down: parents sort before their children, so each directory's
    // base is known by the time its children are visited.
    let mut bases: BTreeMap<String, Tree> = BTreeMap::new();
    for dir in edits.keys() {
        let base_id = if dir.is_empty() {
            base
        } else {
            let (parent, name) = split_parent(dir);
            let overridden = edits
                .get(parent)
                .map(|e| e.contains_key(name))
                .unwrap_or(false);
            match bases.get(parent).and_then(|t| t.get(name)) {
                // replaced or deleted in this batch: rebuild from scratch
                _ if overridden => None,
                Some(entry) if entry.mode == EntryMode::Tree => Some(entry.hash),
                Some(entry) => {
                    return Err(StoreError::InvalidPath {
                        path: dir.clone(),
                        reason: format!("existing {} entry is not a tree", entry.mode.name()),
                    });
                }
                None => None,
            }
        };
        if let Some(id) = base_id {
            bases.insert(dir.clone(), store.load_tree(&id).await?);
        }
    }

    // Bottom-up: children sort after their parents, so reverse order writes
    // every subtree before the directory that links it.
    let dirs: Vec<String> = edits.keys().rev().cloned().collect();
    for dir in dirs {
        let changes = edits.remove(&dir).unwrap_or_default();
        let mut tree = bases.remove(&dir).unwrap_or_default();
        for (name, change) in changes {
            match change {
                Some(entry) => tree.insert(TreeEntry::new(name, entry.mode, entry.hash)),
                None => {
                    tree.remove(&name);
                }
            }
        }

        if dir.is_empty() {
            let id = store.save(&Object::Tree(tree)).await?;
            trace!(tree = %id.short_hex(), "root tree written");
            return Ok(id);
        }

        let (parent, name) = split_parent(&dir);
        let linked = if tree.is_empty() {
            None
        } else {
            Some(Entry::tree(store.save(&Object::Tree(tree)).await?))
        };
        edits
            .entry(parent.to_string())
            .or_default()
            .insert(name.to_string(), linked);
    }

    // The root directory is always present, so the loop returns above.
    Err(StoreError::InvalidPath {
        path: String::new(),
        reason: "root directory missing".into(),
    })
}
