//! Repository backends: where a config's objects live, how an unresolved
//! config gets its first commit, and how submodules are discovered.

use std::sync::Arc;

use arbor_store::{Commit, Object, ObjectStore, Signature, Tree};
use arbor_types::{EntryMode, ObjectId};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::VfsConfig;
use crate::error::{VfsError, VfsResult};
use crate::paths;
use crate::registry::{MountKind, RepoConfig};

/// Hooks the filesystem calls to reach repositories it does not own.
#[async_trait]
pub trait MountBackend: Send + Sync {
    /// The object store holding `config`'s repository.
    fn open_store(&self, config: &RepoConfig) -> VfsResult<Arc<dyn ObjectStore>>;

    /// Resolve `config.current` (and usually `head`) in place.
    async fn expand_config(&self, config: &mut RepoConfig) -> VfsResult<()>;

    /// Record `id` as the latest user-authored commit of `config`'s
    /// repository.
    async fn update_branch(&self, config: &RepoConfig, id: ObjectId) -> VfsResult<()>;

    /// Build the config of the submodule mounted at `path`, found while
    /// walking the repository rooted at `parent_root`. `root_tree` is that
    /// repository's root tree.
    async fn load_submodule(
        &self,
        parent_store: Arc<dyn ObjectStore>,
        parent_config: &RepoConfig,
        root_tree: &Tree,
        parent_root: &str,
        path: &str,
    ) -> VfsResult<RepoConfig>;
}

/// A [`MountBackend`] that keeps every repository in one shared store.
///
/// Each repository gets its own copy of the configured branch under
/// `refs/repos/<name>/`, so `refs/heads/master` for root `notes` lives at
/// `refs/repos/notes/heads/master`. Bytes outside `[A-Za-z0-9_-]` in a
/// repository name are written as `%XX`.
///
/// - `empty` mounts (and `local` mounts whose branch does not exist yet)
///   get an initial commit of the empty tree.
/// - `local` mounts start from their branch ref.
/// - `remote-clone` and `live-mount` configs cannot be expanded; there is no
///   network transport.
/// - Submodules start at the commit recorded in the parent tree; their
///   remote URL is read from `.gitmodules` when one is present.
pub struct StoreMounts {
    store: Arc<dyn ObjectStore>,
    branch_ref: String,
    author_name: String,
    author_email: String,
}

impl StoreMounts {
    pub fn new(store: Arc<dyn ObjectStore>, config: &VfsConfig) -> Self {
        Self {
            store,
            branch_ref: config.branch_ref.clone(),
            author_name: config.author_name.clone(),
            author_email: config.author_email.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// The branch ref of the repository named `repo`.
    pub fn repo_ref(&self, repo: &str) -> String {
        let branch = self.branch_ref.strip_prefix("refs/").unwrap_or(&self.branch_ref);
        let repo = repo
            .split('/')
            .map(escape_ref_component)
            .collect::<Vec<_>>()
            .join("/");
        format!("refs/repos/{repo}/{branch}")
    }

    async fn initial_commit(&self, repo: &str) -> VfsResult<ObjectId> {
        let tree = self.store.save(&Object::Tree(Tree::empty())).await?;
        let commit = Commit {
            tree,
            parents: Vec::new(),
            author: Signature::now(&self.author_name, &self.author_email),
            message: "Initial commit".into(),
        };
        let id = self.store.save(&Object::Commit(commit)).await?;
        self.store.update_ref(&self.repo_ref(repo), id).await?;
        Ok(id)
    }
}

#[async_trait]
impl MountBackend for StoreMounts {
    fn open_store(&self, _config: &RepoConfig) -> VfsResult<Arc<dyn ObjectStore>> {
        Ok(self.store.clone())
    }

    async fn expand_config(&self, config: &mut RepoConfig) -> VfsResult<()> {
        let id = match config.mount {
            MountKind::Empty => self.initial_commit(&config.name).await?,
            MountKind::Local => match self.store.read_ref(&self.repo_ref(&config.name)).await? {
                Some(id) => id,
                None => self.initial_commit(&config.name).await?,
            },
            MountKind::RemoteClone | MountKind::LiveMount => {
                return Err(VfsError::Mount {
                    root: config.name.clone(),
                    reason: format!("{:?} mounts need a network transport", config.mount),
                });
            }
        };
        info!(root = %config.name, commit = %id.short_hex(), "config expanded");
        config.current = Some(id);
        config.head = Some(id);
        Ok(())
    }

    async fn update_branch(&self, config: &RepoConfig, id: ObjectId) -> VfsResult<()> {
        self.store.update_ref(&self.repo_ref(&config.name), id).await?;
        Ok(())
    }

    async fn load_submodule(
        &self,
        parent_store: Arc<dyn ObjectStore>,
        _parent_config: &RepoConfig,
        root_tree: &Tree,
        parent_root: &str,
        path: &str,
    ) -> VfsResult<RepoConfig> {
        let relative = paths::strip_root(path, parent_root).ok_or_else(|| VfsError::Mount {
            root: path.to_string(),
            reason: format!("not inside {parent_root:?}"),
        })?;

        let mut tree = root_tree.clone();
        let mut found = None;
        let mut segments = relative.split('/').peekable();
        while let Some(segment) = segments.next() {
            let Some(entry) = tree.get(segment).map(|e| e.entry()) else {
                break;
            };
            if segments.peek().is_none() {
                found = Some(entry);
            } else if entry.mode == EntryMode::Tree {
                tree = parent_store.load_tree(&entry.hash).await?;
            } else {
                break;
            }
        }
        let entry = found
            .filter(|e| e.mode == EntryMode::Commit)
            .ok_or_else(|| VfsError::Mount {
                root: path.to_string(),
                reason: "no submodule commit at path".into(),
            })?;

        let url = match root_tree.get(".gitmodules") {
            Some(e) if e.mode.is_file() => {
                let blob = parent_store.load_blob(&e.hash).await?;
                submodule_url(&String::from_utf8_lossy(&blob.data), relative)
            }
            _ => None,
        };
        debug!(path, url = ?url, "submodule discovered");

        let mut config = RepoConfig::new(MountKind::Local).with_commit(entry.hash);
        config.name = path.to_string();
        config.remote_ref = url;
        Ok(config)
    }
}

/// Find the `url` of the `.gitmodules` section whose `path` is `relative`.
pub fn submodule_url(gitmodules: &str, relative: &str) -> Option<String> {
    // (path, url) per section
    let mut sections: Vec<(Option<&str>, Option<&str>)> = Vec::new();
    for line in gitmodules.lines().map(str::trim) {
        if line.starts_with('[') {
            sections.push((None, None));
            continue;
        }
        let (Some((key, value)), Some(section)) = (line.split_once('='), sections.last_mut())
        else {
            continue;
        };
        match key.trim() {
            "path" => section.0 = Some(value.trim()),
            "url" => section.1 = Some(value.trim()),
            _ => {}
        }
    }
    sections
        .into_iter()
        .find(|(path, _)| *path == Some(relative))
        .and_then(|(_, url)| url.map(str::to_string))
}

fn escape_ref_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
