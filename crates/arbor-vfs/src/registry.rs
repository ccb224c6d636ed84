//! Root name to repository configuration.
//!
//! The registry holds one [`RepoConfig`] per mounted repository: top-level
//! roots (`proj`) and discovered submodules (`proj/lib`), keyed by full
//! path. Every mutation sets a dirty flag so the embedding application can
//! persist a [`RegistrySnapshot`] when it sees fit.

use std::collections::BTreeMap;

use arbor_types::ObjectId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{VfsError, VfsResult};
use crate::names::unique_name;
use crate::paths;

/// How a repository's content is obtained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountKind {
    /// Backed by a local store branch.
    Local,
    /// A full clone of a remote repository.
    RemoteClone,
    /// A remote repository accessed live, without a local clone.
    LiveMount,
    /// A fresh repository with no prior history.
    #[default]
    Empty,
}

/// Per-repository state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Full path of the repository root; unique within the registry.
    pub name: String,
    /// Working commit, including automatic commits. Absent until expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<ObjectId>,
    /// Last user-authored commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<ObjectId>,
    #[serde(default)]
    pub mount: MountKind,
    /// Opaque remote reference (URL, `owner/name`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ref: Option<String>,
}

impl RepoConfig {
    pub fn new(mount: MountKind) -> Self {
        Self {
            name: String::new(),
            current: None,
            head: None,
            mount,
            remote_ref: None,
        }
    }

    pub fn with_remote(mut self, remote_ref: impl Into<String>) -> Self {
        self.remote_ref = Some(remote_ref.into());
        self
    }

    pub fn with_commit(mut self, id: ObjectId) -> Self {
        self.current = Some(id);
        self.head = Some(id);
        self
    }

    /// Uncommitted changes exist when `current` has moved away from `head`.
    pub fn is_dirty(&self) -> bool {
        self.current != self.head
    }
}

/// Serializable form of the registry, as persisted by embedders.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub roots: Vec<RepoConfig>,
}

/// Root name to [`RepoConfig`] map with dirty tracking.
#[derive(Clone, Debug, Default)]
pub struct RootRegistry {
    configs: BTreeMap<String, RepoConfig>,
    dirty: bool,
}

impl RootRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from a snapshot. The result starts clean.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let configs = snapshot
            .roots
            .into_iter()
            .map(|config| (config.name.clone(), config))
            .collect();
        Self {
            configs,
            dirty: false,
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            roots: self.configs.values().cloned().collect(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag, returning whether it was set.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Register a new top-level root. The requested name is made safe and
    /// unique; the allocated name is returned and stored in `config.name`.
    pub fn add_root(&mut self, requested: &str, mut config: RepoConfig) -> String {
        let name = unique_name(requested, |n| self.configs.contains_key(n));
        info!(root = %name, mount = ?config.mount, "root added");
        config.name = name.clone();
        self.configs.insert(name.clone(), config);
        self.dirty = true;
        name
    }

    /// Rename a root, moving any nested submodule configs along with it.
    pub fn rename_root(&mut self, old: &str, requested: &str) -> VfsResult<String> {
        let config = self
            .configs
            .remove(old)
            .ok_or_else(|| VfsError::NotFound(old.to_string()))?;
        let nested = self.take_nested(old);
        let name = self.add_root(requested, config);
        for mut child in nested {
            if let Some(rest) = paths::strip_root(&child.name, old) {
                child.name = paths::join(&name, rest);
                self.configs.insert(child.name.clone(), child);
            }
        }
        info!(from = old, to = %name, "root renamed");
        Ok(name)
    }

    /// Remove a root and every config nested beneath it.
    pub fn remove_root(&mut self, name: &str) -> VfsResult<RepoConfig> {
        let config = self
            .configs
            .remove(name)
            .ok_or_else(|| VfsError::NotFound(name.to_string()))?;
        let nested = self.take_nested(name);
        info!(root = name, nested = nested.len(), "root removed");
        self.dirty = true;
        Ok(config)
    }

    fn take_nested(&mut self, name: &str) -> Vec<RepoConfig> {
        let nested: Vec<String> = self
            .configs
            .keys()
            .filter(|key| paths::strip_root(key, name).is_some())
            .cloned()
            .collect();
        nested
            .into_iter()
            .filter_map(|key| self.configs.remove(&key))
            .collect()
    }

    /// Remove every config whose name matches `pattern`.
    pub fn remove_matching(&mut self, pattern: &Regex) -> Vec<String> {
        let removed: Vec<String> = self
            .configs
            .keys()
            .filter(|name| pattern.is_match(name))
            .cloned()
            .collect();
        for name in &removed {
            self.configs.remove(name);
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), %pattern, "roots removed by pattern");
            self.dirty = true;
        }
        removed
    }

    /// Rename every config whose name matches `pattern`, replacing the first
    /// match with `replacement` (`$1`-style groups allowed). An existing
    /// config under the new name is replaced.
    pub fn rename_matching(&mut self, pattern: &Regex, replacement: &str) -> Vec<(String, String)> {
        let matching: Vec<String> = self
            .configs
            .keys()
            .filter(|name| pattern.is_match(name))
            .cloned()
            .collect();
        let mut renamed = Vec::with_capacity(matching.len());
        for old in matching {
            let new = pattern.replace(&old, replacement).into_owned();
            if let Some(mut config) = self.configs.remove(&old) {
                config.name = new.clone();
                self.configs.insert(new.clone(), config);
                renamed.push((old, new));
            }
        }
        if !renamed.is_empty() {
            debug!(count = renamed.len(), %pattern, "roots renamed by pattern");
            self.dirty = true;
        }
        renamed
    }

    pub fn lookup(&self, name: &str) -> Option<&RepoConfig> {
        self.configs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    /// Every registered name, sorted, including submodule paths.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    /// Sorted names of top-level roots only.
    pub fn list_root_names(&self) -> Vec<String> {
        self.names()
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect()
    }

    /// Configs ordered by name.
    pub fn configs(&self) -> impl Iterator<Item = &RepoConfig> {
        self.configs.values()
    }

    /// Registered config owning `path` by longest strict prefix.
    pub fn owner_of(&self, path: &str) -> Option<&RepoConfig> {
        paths::longest_match(path, self.names()).and_then(|root| self.configs.get(root))
    }

    /// Insert or replace a config under its own name.
    pub fn insert(&mut self, config: RepoConfig) {
        self.configs.insert(config.name.clone(), config);
        self.dirty = true;
    }

    /// Publish a config resolved elsewhere (expansion or submodule
    /// discovery) unless the live registry already has a resolved one.
    pub fn adopt(&mut self, config: RepoConfig) {
        let resolved = self
            .configs
            .get(&config.name)
            .is_some_and(|existing| existing.current.is_some());
        if !resolved {
            self.insert(config);
        }
    }

    /// Move `current` for a registered config. Returns `false` if the
    /// config no longer exists.
    pub fn set_current(&mut self, name: &str, id: ObjectId) -> bool {
        match self.configs.get_mut(name) {
            Some(config) => {
                config.current = Some(id);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Point both `current` and `head` at `id`.
    pub fn set_head(&mut self, name: &str, id: ObjectId) -> bool {
        match self.configs.get_mut(name) {
            Some(config) => {
                config.current = Some(id);
                config.head = Some(id);
                self.dirty = true;
                true
            }
            None => false,
        }
    }
}
