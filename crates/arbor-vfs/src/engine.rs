//! Write transactions over nested repositories.
//!
//! A closed batch of `path -> entry` writes is split into per-repository
//! groups by longest-prefix root match. Leaf groups (no other touched
//! repository nested below them) are turned into new trees and commits
//! concurrently; each result becomes a commit entry in its parent
//! repository's group, and the process repeats until no group is left.
//! Nothing here touches the live registry: the caller applies the returned
//! [`Transaction`] only if every group succeeded.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arbor_store::{Commit, Object, ObjectStore, Signature, TreeAction};
use arbor_types::{Entry, EntryMode, ObjectId};
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::cache::ObjectCache;
use crate::config::VfsConfig;
use crate::error::{VfsError, VfsResult};
use crate::mounts::MountBackend;
use crate::paths;
use crate::registry::{RepoConfig, RootRegistry};
use crate::resolver::Resolver;

/// Full path -> new entry, or `None` to delete.
pub type WriteSet = BTreeMap<String, Option<Entry>>;

/// Outcome of a successful batch.
#[derive(Debug, Default)]
pub(crate) struct Transaction {
    /// New `current` commit for every touched repository.
    pub currents: BTreeMap<String, ObjectId>,
    /// Configs expanded or discovered while processing the batch.
    pub discovered: Vec<RepoConfig>,
}

#[derive(Clone)]
struct AutoCommit {
    name: String,
    email: String,
    message: String,
}

pub(crate) struct Engine<'a> {
    mounts: &'a Arc<dyn MountBackend>,
    cache: &'a Arc<ObjectCache>,
    auto: AutoCommit,
}

impl<'a> Engine<'a> {
    pub fn new(
        mounts: &'a Arc<dyn MountBackend>,
        cache: &'a Arc<ObjectCache>,
        config: &VfsConfig,
    ) -> Self {
        Self {
            mounts,
            cache,
            auto: AutoCommit {
                name: config.author_name.clone(),
                email: config.author_email.clone(),
                message: config.auto_commit_message.clone(),
            },
        }
    }

    /// Apply `writes` on top of `registry` (a snapshot taken when the batch
    /// closed).
    pub async fn run(&self, mut registry: RootRegistry, writes: WriteSet) -> VfsResult<Transaction> {
        let resolver = Resolver::new(&**self.mounts, &**self.cache);
        let mut discovered = Vec::new();

        // Walk the parent directory of every write first, so submodules
        // along the way are registered and own their paths.
        let dirs: BTreeSet<&str> = writes
            .keys()
            .filter_map(|path| paths::split_parent(path).map(|(dir, _)| dir))
            .filter(|dir| registry.contains(paths::root_name(dir)))
            .collect();
        for dir in dirs {
            let resolution = resolver.resolve(&mut registry, dir).await?;
            discovered.extend(resolution.discovered);
        }

        let (mut groups, mut currents) = group_writes(&registry, writes)?;

        let mut round = 0usize;
        while !groups.is_empty() {
            round += 1;
            let leaves = find_leaves(&groups);
            trace!(round, leaves = ?leaves, "processing leaf repositories");

            let mut tasks = JoinSet::new();
            for leaf in leaves {
                let actions: Vec<TreeAction> = groups
                    .remove(&leaf)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(path, entry)| TreeAction { path, entry })
                    .collect();
                let config = resolver
                    .expanded(&mut registry, &leaf, &mut discovered)
                    .await?;
                let store = self.mounts.open_store(&config)?;
                let cache = self.cache.clone();
                let auto = self.auto.clone();
                tasks.spawn(async move {
                    let hash = process_leaf(store, &cache, &config, actions, &auto).await?;
                    Ok::<_, VfsError>((leaf, hash))
                });
            }

            let mut finished = BTreeMap::new();
            while let Some(joined) = tasks.join_next().await {
                let (leaf, hash) = joined.map_err(|e| VfsError::Task(e.to_string()))??;
                finished.insert(leaf, hash);
            }

            for (leaf, hash) in finished {
                if let Some(parent) = paths::longest_match(&leaf, registry.names()) {
                    let local = leaf[parent.len() + 1..].to_string();
                    debug!(repo = %leaf, parent, commit = %hash.short_hex(), "propagating to parent");
                    groups
                        .entry(parent.to_string())
                        .or_default()
                        .insert(local, Some(Entry::commit(hash)));
                }
                currents.insert(leaf, hash);
            }
        }

        Ok(Transaction {
            currents,
            discovered,
        })
    }
}

type Groups = BTreeMap<String, WriteSet>;

/// Split full-path writes into per-repository groups of relative writes.
///
/// A bare root name written with a commit entry sets that root's `current`
/// directly; any other path outside every registered root fails the batch.
fn group_writes(
    registry: &RootRegistry,
    writes: WriteSet,
) -> VfsResult<(Groups, BTreeMap<String, ObjectId>)> {
    let mut groups = Groups::new();
    let mut currents = BTreeMap::new();
    for (path, entry) in writes {
        match paths::longest_match(&path, registry.names()) {
            Some(root) => {
                let local = path[root.len() + 1..].to_string();
                groups.entry(root.to_string()).or_default().insert(local, entry);
            }
            None => match entry {
                Some(entry)
                    if entry.mode == EntryMode::Commit
                        && !path.contains('/')
                        && registry.contains(&path) =>
                {
                    currents.insert(path, entry.hash);
                }
                _ => return Err(VfsError::NoRootMatch(path)),
            },
        }
    }
    Ok((groups, currents))
}

/// Groups that are not the nearest touched ancestor of another group.
fn find_leaves(groups: &Groups) -> Vec<String> {
    let parents: BTreeSet<&str> = groups
        .keys()
        .filter_map(|path| paths::longest_match(path, groups.keys().map(String::as_str)))
        .collect();
    groups
        .keys()
        .filter(|path| !parents.contains(path.as_str()))
        .cloned()
        .collect()
}

/// Build the leaf's new tree over its current one and return the commit
/// that should become its `current`.
async fn process_leaf(
    store: Arc<dyn ObjectStore>,
    cache: &ObjectCache,
    config: &RepoConfig,
    actions: Vec<TreeAction>,
    auto: &AutoCommit,
) -> VfsResult<ObjectId> {
    let current = config
        .current
        .ok_or_else(|| VfsError::MissingRepository(config.name.clone()))?;
    let base = cache.commit(&*store, &current).await?.tree;
    let count = actions.len();
    let tree = store.create_tree(Some(base), actions).await?;

    if let Some(head) = config.head {
        if cache.commit(&*store, &head).await?.tree == tree {
            debug!(repo = %config.name, "tree matches head");
            return Ok(head);
        }
    }

    let commit = Commit {
        tree,
        parents: config.head.into_iter().collect(),
        author: Signature::now(&auto.name, &auto.email),
        message: auto.message.clone(),
    };
    let id = store.save(&Object::Commit(commit)).await?;
    debug!(repo = %config.name, actions = count, commit = %id.short_hex(), "automatic commit");
    Ok(id)
}
