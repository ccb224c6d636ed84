//! Loose-object store on the local filesystem.
//!
//! On-disk layout under the store root:
//!
//! ```text
//! objects/<first 2 hex>/<remaining 62 hex>   one file per object
//! refs/heads/<branch>                         hex id + newline
//! ```
//!
//! Each object file holds the kind tag, a newline, then the encoded data.
//! Files are written to a temporary sibling and renamed into place, so a
//! reader never observes a partial object. Every write gets its own
//! temporary name, so concurrent writers of the same object never collide.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use arbor_types::ObjectId;
use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, StoredObject};
use crate::refs::validate_ref_name;
use crate::traits::ObjectStore;

/// Distinguishes temporary files of concurrent writes within one process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Filesystem-backed loose object store.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects")).await?;
        fs::create_dir_all(root.join("refs")).await?;
        debug!(root = %root.display(), "opened loose object store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        name.split('/')
            .fold(self.root.clone(), |path, component| path.join(component))
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp-{}-{seq}", std::process::id()));
        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

fn encode(object: &StoredObject) -> Vec<u8> {
    let tag = object.kind.to_string();
    let mut out = Vec::with_capacity(tag.len() + 1 + object.data.len());
    out.extend_from_slice(tag.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(&object.data);
    out
}

fn decode(id: &ObjectId, raw: Vec<u8>) -> StoreResult<StoredObject> {
    let corrupt = |reason: &str| StoreError::CorruptObject {
        id: *id,
        reason: reason.to_string(),
    };
    let split = raw
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| corrupt("missing kind header"))?;
    let tag = std::str::from_utf8(&raw[..split]).map_err(|_| corrupt("non-utf8 kind header"))?;
    let kind = ObjectKind::from_tag(tag).ok_or_else(|| corrupt("unknown kind header"))?;
    let data = &raw[split + 1..];
    if !kind.hasher().verify(data, id) {
        return Err(corrupt("content does not match id"));
    }
    Ok(StoredObject::new(kind, data.to_vec()))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        match fs::read(self.object_path(id)).await {
            Ok(raw) => decode(id, raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        let id = object.compute_id();
        let path = self.object_path(&id);
        if fs::try_exists(&path).await? {
            return Ok(id);
        }
        if let Err(e) = Self::write_atomic(&path, &encode(object)).await {
            // another writer may have stored the same content first
            if !fs::try_exists(&path).await? {
                return Err(e);
            }
        }
        Ok(id)
    }

    async fn read_ref(&self, name: &str) -> StoreResult<Option<ObjectId>> {
        validate_ref_name(name)?;
        match fs::read_to_string(self.ref_path(name)).await {
            Ok(text) => text.parse().map(Some).map_err(|e| StoreError::CorruptObject {
                id: ObjectId::null(),
                reason: format!("ref {name}: {e}"),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_ref(&self, name: &str, id: ObjectId) -> StoreResult<()> {
        validate_ref_name(name)?;
        Self::write_atomic(&self.ref_path(name), format!("{id}\n").as_bytes()).await?;
        debug!(r#ref = name, id = %id.short_hex(), "ref updated");
        Ok(())
    }
}
