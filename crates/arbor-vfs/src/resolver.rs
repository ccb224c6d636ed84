//! Path resolution across nested repository boundaries.

use std::sync::Arc;

use arbor_store::{ObjectStore, Tree};
use arbor_types::{Entry, EntryMode};
use tracing::{debug, trace};

use crate::cache::ObjectCache;
use crate::error::{VfsError, VfsResult};
use crate::mounts::MountBackend;
use crate::paths;
use crate::registry::{RepoConfig, RootRegistry};

/// Result of resolving a full path.
///
/// `config` and `store` belong to the innermost repository reached. When the
/// final segment is missing, `entry` is `None` and the repository is the one
/// that would own it.
#[derive(Clone)]
pub struct Resolved {
    pub path: String,
    pub entry: Option<Entry>,
    pub config: RepoConfig,
    pub store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("path", &self.path)
            .field("entry", &self.entry)
            .field("repo", &self.config.name)
            .finish()
    }
}

/// A resolution plus the configs it had to expand or discover.
#[derive(Debug)]
pub(crate) struct Resolution {
    pub resolved: Resolved,
    pub discovered: Vec<RepoConfig>,
}

pub(crate) struct Resolver<'a> {
    mounts: &'a dyn MountBackend,
    cache: &'a ObjectCache,
}

impl<'a> Resolver<'a> {
    pub fn new(mounts: &'a dyn MountBackend, cache: &'a ObjectCache) -> Self {
        Self { mounts, cache }
    }

    /// Resolve `path` (already normalized, non-empty) against `registry`.
    ///
    /// Expanded and discovered configs are registered in `registry` and
    /// also returned so the caller can publish them.
    pub async fn resolve(&self, registry: &mut RootRegistry, path: &str) -> VfsResult<Resolution> {
        let segments: Vec<&str> = path.split('/').collect();
        let mut discovered = Vec::new();

        let mut root = segments[0].to_string();
        let mut config = self
            .expanded(registry, &root, &mut discovered)
            .await?;
        let mut store = self.mounts.open_store(&config)?;

        let mut mode = EntryMode::Commit;
        let mut hash = config
            .current
            .ok_or_else(|| VfsError::MissingRepository(root.clone()))?;
        let mut walked = root.clone();
        let mut root_tree: Option<Arc<Tree>> = None;
        let mut index = 1;

        while index < segments.len() {
            if mode == EntryMode::Commit {
                hash = self.cache.commit(&*store, &hash).await?.tree;
                mode = EntryMode::Tree;
            }
            if mode != EntryMode::Tree {
                // a file or link with segments left below it
                return Ok(absent(path, config, store, discovered));
            }

            let tree = self.cache.tree(&*store, &hash).await?;
            if walked == root {
                root_tree = Some(tree.clone());
            }
            let name = segments[index];
            index += 1;
            let Some(entry) = tree.get(name).map(|e| e.entry()) else {
                return Ok(absent(path, config, store, discovered));
            };
            walked = paths::join(&walked, name);
            mode = entry.mode;
            hash = entry.hash;

            if mode != EntryMode::Commit {
                continue;
            }
            let child = match registry.lookup(&walked) {
                Some(child) => child.clone(),
                None => {
                    let parent_tree = root_tree.as_deref().ok_or_else(|| VfsError::Mount {
                        root: walked.clone(),
                        reason: "parent root tree not loaded".into(),
                    })?;
                    let child = self
                        .mounts
                        .load_submodule(store.clone(), &config, parent_tree, &root, &walked)
                        .await?;
                    debug!(root = %root, submodule = %walked, "submodule registered");
                    registry.insert(child.clone());
                    discovered.push(child.clone());
                    child
                }
            };
            trace!(from = %root, to = %walked, "crossed repository boundary");
            store = self.mounts.open_store(&child)?;
            config = child;
            root = walked.clone();
        }

        Ok(Resolution {
            resolved: Resolved {
                path: path.to_string(),
                entry: Some(Entry::new(mode, hash)),
                config,
                store,
            },
            discovered,
        })
    }

    /// Look up a root config, expanding it first if it has no `current`.
    pub async fn expanded(
        &self,
        registry: &mut RootRegistry,
        name: &str,
        discovered: &mut Vec<RepoConfig>,
    ) -> VfsResult<RepoConfig> {
        let mut config = registry
            .lookup(name)
            .cloned()
            .ok_or_else(|| VfsError::NotFound(name.to_string()))?;
        if config.current.is_some() {
            return Ok(config);
        }
        self.mounts.expand_config(&mut config).await?;
        if config.current.is_none() {
            return Err(VfsError::Mount {
                root: name.to_string(),
                reason: "expansion left current unset".into(),
            });
        }
        registry.insert(config.clone());
        discovered.push(config.clone());
        Ok(config)
    }
}

fn absent(
    path: &str,
    config: RepoConfig,
    store: Arc<dyn ObjectStore>,
    discovered: Vec<RepoConfig>,
) -> Resolution {
    Resolution {
        resolved: Resolved {
            path: path.to_string(),
            entry: None,
            config,
            store,
        },
        discovered,
    }
}
