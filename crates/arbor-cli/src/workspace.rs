//! On-disk workspace: settings, persisted root registry, and the loose
//! object store, all under one directory.
//!
//! ```text
//! <dir>/arbor.toml    user identity and VFS tuning
//! <dir>/roots.toml    registry snapshot, rewritten when it changes
//! <dir>/objects/      loose objects
//! <dir>/refs/         branch refs
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use arbor_store::{FsObjectStore, ObjectStore};
use arbor_vfs::{RegistrySnapshot, RootRegistry, StoreMounts, Vfs, VfsConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

const CONFIG_FILE: &str = "arbor.toml";
const ROOTS_FILE: &str = "roots.toml";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub name: String,
    pub email: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            name: "Arbor User".into(),
            email: "user@arbor.local".into(),
        }
    }
}

/// Contents of `arbor.toml`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub user: UserConfig,
    pub vfs: VfsConfig,
}

pub struct Workspace {
    dir: PathBuf,
    config: WorkspaceConfig,
    vfs: Vfs,
}

impl Workspace {
    /// Create the workspace layout. Existing settings and roots are kept.
    pub async fn init(dir: &Path) -> anyhow::Result<()> {
        FsObjectStore::open(dir)
            .await
            .with_context(|| format!("creating object store in {}", dir.display()))?;
        let config_path = dir.join(CONFIG_FILE);
        if !tokio::fs::try_exists(&config_path).await? {
            let text = toml::to_string_pretty(&WorkspaceConfig::default())?;
            tokio::fs::write(&config_path, text).await?;
        }
        let roots_path = dir.join(ROOTS_FILE);
        if !tokio::fs::try_exists(&roots_path).await? {
            let text = toml::to_string_pretty(&RegistrySnapshot::default())?;
            tokio::fs::write(&roots_path, text).await?;
        }
        Ok(())
    }

    /// Open an initialized workspace.
    pub async fn open(dir: &Path) -> anyhow::Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if !tokio::fs::try_exists(&config_path).await? {
            bail!(
                "{} is not an arbor workspace (run `arbor init` first)",
                dir.display()
            );
        }
        let config: WorkspaceConfig = toml::from_str(
            &tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("reading {}", config_path.display()))?,
        )
        .with_context(|| format!("parsing {}", config_path.display()))?;

        let roots_path = dir.join(ROOTS_FILE);
        let snapshot: RegistrySnapshot = match tokio::fs::read_to_string(&roots_path).await {
            Ok(text) => toml::from_str(&text)
                .with_context(|| format!("parsing {}", roots_path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistrySnapshot::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(dir = %dir.display(), roots = snapshot.roots.len(), "workspace opened");

        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::open(dir).await?);
        let mounts = Arc::new(StoreMounts::new(store, &config.vfs));
        let vfs = Vfs::with_registry(
            mounts,
            config.vfs.clone(),
            RootRegistry::from_snapshot(snapshot),
        );
        vfs.on_change(|event| {
            debug!(root = %event.root, hash = %event.hash.short_hex(), "root changed");
        });
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            vfs,
        })
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Write `roots.toml` if the registry changed since it was loaded.
    pub async fn persist(&self) -> anyhow::Result<bool> {
        if !self.vfs.take_dirty() {
            return Ok(false);
        }
        let text = toml::to_string_pretty(&self.vfs.snapshot())?;
        let path = self.dir.join(ROOTS_FILE);
        let tmp = path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "registry persisted");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_vfs::{MountKind, RepoConfig};

    #[tokio::test]
    async fn open_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Workspace::open(dir.path()).await.is_err());
        Workspace::init(dir.path()).await.unwrap();
        assert!(Workspace::open(dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        Workspace::init(dir.path()).await.unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[user]\nname = \"Ada\"\n\n[vfs]\nbatch_window_ms = 5\n",
        )
        .unwrap();
        let ws = Workspace::open(dir.path()).await.unwrap();
        assert_eq!(ws.config().user.name, "Ada");
        assert_eq!(ws.config().user.email, UserConfig::default().email);
        assert_eq!(ws.config().vfs.batch_window_ms, 5);
        assert_eq!(ws.config().vfs.branch_ref, "refs/heads/master");
    }

    #[tokio::test]
    async fn files_and_roots_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        Workspace::init(dir.path()).await.unwrap();

        let ws = Workspace::open(dir.path()).await.unwrap();
        let name = ws.vfs().add_root("notes", RepoConfig::new(MountKind::Empty));
        ws.vfs()
            .write_file("notes/todo.txt", "buy milk")
            .await
            .unwrap();
        assert!(ws.persist().await.unwrap());
        assert!(!ws.persist().await.unwrap());
        drop(ws);

        let ws = Workspace::open(dir.path()).await.unwrap();
        assert_eq!(ws.vfs().list_root_names(), vec![name]);
        let (data, _) = ws.vfs().read_file("notes/todo.txt").await.unwrap();
        assert_eq!(data, b"buy milk");
        assert_eq!(ws.vfs().is_dirty("notes"), Some(true));
    }
}
