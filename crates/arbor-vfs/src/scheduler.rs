//! The filesystem coordinator.
//!
//! [`Vfs`] owns the root registry, the open write batch, and the read
//! queues. It moves between three phases:
//!
//! ```text
//! Idle --write--> Accumulating --end of turn--> Committing --done--> Idle
//!                                                  |   ^
//!                                                  +---+ writes arrived meanwhile
//! ```
//!
//! The flush is scheduled when a write's future is first polled, so every
//! write a task issues before it next awaits lands in the same batch, on
//! any runtime flavor.
//!
//! Reads outside `Committing` resolve against the registry as it is when
//! they are issued. Reads issued during `Committing` wait and are resolved
//! against the state that batch produced, before the next batch starts.
//! Writes always join the open batch; a batch is one atomic transaction.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use arbor_store::{Blob, Commit, Object, ObjectStore, Tree, TreeEntry};
use arbor_types::{Entry, EntryMode, ObjectId};
use regex::Regex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::ObjectCache;
use crate::config::VfsConfig;
use crate::engine::{Engine, Transaction, WriteSet};
use crate::error::{VfsError, VfsResult};
use crate::mounts::{MountBackend, StoreMounts};
use crate::names::unique_name;
use crate::notify::{ChangeBus, ChangeEvent, ChangeFilter, ChangeStream};
use crate::paths;
use crate::registry::{MountKind, RegistrySnapshot, RepoConfig, RootRegistry};
use crate::resolver::{Resolved, Resolver};

/// Coordinator phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No batch open; reads resolve immediately.
    Idle,
    /// A batch is open and collecting writes.
    Accumulating,
    /// A batch is being applied; reads queue, writes go to the next batch.
    Committing,
}

/// The four hashes describing a commit node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitHashes {
    pub current: ObjectId,
    pub current_tree: ObjectId,
    pub head: Option<ObjectId>,
    pub head_tree: Option<ObjectId>,
}

type WriteWaiter = oneshot::Sender<VfsResult<()>>;
type ReadWaiter = oneshot::Sender<VfsResult<Resolved>>;

#[derive(Default)]
struct PendingBatch {
    writes: WriteSet,
    waiters: Vec<WriteWaiter>,
}

struct State {
    registry: RootRegistry,
    phase: Phase,
    pending: Option<PendingBatch>,
    flush_scheduled: bool,
    read_queues: BTreeMap<String, Vec<ReadWaiter>>,
}

struct Inner {
    config: VfsConfig,
    mounts: Arc<dyn MountBackend>,
    cache: Arc<ObjectCache>,
    bus: ChangeBus,
    state: Mutex<State>,
}

enum ReadPlan {
    Now(RootRegistry),
    Queued(oneshot::Receiver<VfsResult<Resolved>>),
}

/// Virtual filesystem over a registry of nested repositories.
///
/// Cloning is cheap; clones share one coordinator. Awaiting a write spawns a
/// tokio task to flush its batch, so it must happen within a runtime.
#[derive(Clone)]
pub struct Vfs {
    inner: Arc<Inner>,
}

impl Vfs {
    pub fn new(mounts: Arc<dyn MountBackend>, config: VfsConfig) -> Self {
        Self::with_registry(mounts, config, RootRegistry::new())
    }

    /// Start from a previously persisted registry.
    pub fn with_registry(
        mounts: Arc<dyn MountBackend>,
        config: VfsConfig,
        registry: RootRegistry,
    ) -> Self {
        let inner = Inner {
            cache: Arc::new(ObjectCache::new(config.cache_capacity)),
            bus: ChangeBus::new(config.channel_capacity),
            state: Mutex::new(State {
                registry,
                phase: Phase::Idle,
                pending: None,
                flush_scheduled: false,
                read_queues: BTreeMap::new(),
            }),
            mounts,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Every repository in one shared store, via [`StoreMounts`].
    pub fn with_store(store: Arc<dyn ObjectStore>, config: VfsConfig) -> Self {
        let mounts = Arc::new(StoreMounts::new(store, &config));
        Self::new(mounts, config)
    }

    pub fn config(&self) -> &VfsConfig {
        &self.inner.config
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().expect("vfs state lock poisoned")
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    // ---- reads ----

    /// Resolve a full path to its entry and owning repository.
    ///
    /// A missing final segment is not an error: `entry` is `None`. A path
    /// whose first segment names no root is [`VfsError::NotFound`].
    pub async fn read_entry(&self, path: &str) -> VfsResult<Resolved> {
        let path = paths::normalize_non_empty(path)?;
        let plan = {
            let mut state = self.state();
            if state.phase == Phase::Committing {
                let (tx, rx) = oneshot::channel();
                state.read_queues.entry(path.clone()).or_default().push(tx);
                ReadPlan::Queued(rx)
            } else {
                ReadPlan::Now(state.registry.clone())
            }
        };
        match plan {
            ReadPlan::Now(snapshot) => self.resolve_in(snapshot, &path).await,
            ReadPlan::Queued(rx) => rx.await.map_err(|_| VfsError::Closed)?,
        }
    }

    async fn resolve_in(&self, mut snapshot: RootRegistry, path: &str) -> VfsResult<Resolved> {
        let resolution = Resolver::new(&*self.inner.mounts, &self.inner.cache)
            .resolve(&mut snapshot, path)
            .await?;
        if !resolution.discovered.is_empty() {
            let mut state = self.state();
            for config in resolution.discovered {
                state.registry.adopt(config);
            }
        }
        Ok(resolution.resolved)
    }

    async fn existing(&self, path: &str) -> VfsResult<(Entry, Resolved)> {
        let resolved = self.read_entry(path).await?;
        let entry = resolved
            .entry
            .ok_or_else(|| VfsError::NotFound(resolved.path.clone()))?;
        Ok((entry, resolved))
    }

    /// Load the tree at `path`. Commit nodes read as their root tree.
    ///
    /// The empty path reads a virtual tree listing every top-level root as a
    /// commit entry (null hash while a root is still unresolved).
    pub async fn read_tree(&self, path: &str) -> VfsResult<(Arc<Tree>, ObjectId)> {
        let path = paths::normalize(path)?;
        if path.is_empty() {
            return self.read_root_tree();
        }
        let (entry, resolved) = self.existing(&path).await?;
        let store = &*resolved.store;
        let tree_id = match entry.mode {
            EntryMode::Commit => self.inner.cache.commit(store, &entry.hash).await?.tree,
            EntryMode::Tree => entry.hash,
            mode => {
                return Err(VfsError::InvalidMode {
                    path,
                    mode,
                    expected: "tree or commit",
                })
            }
        };
        let tree = self.inner.cache.tree(store, &tree_id).await?;
        Ok((tree, tree_id))
    }

    fn read_root_tree(&self) -> VfsResult<(Arc<Tree>, ObjectId)> {
        let entries: Vec<TreeEntry> = {
            let state = self.state();
            state
                .registry
                .configs()
                .filter(|config| !config.name.contains('/'))
                .map(|config| {
                    TreeEntry::new(
                        config.name.clone(),
                        EntryMode::Commit,
                        config.current.unwrap_or_else(ObjectId::null),
                    )
                })
                .collect()
        };
        let tree = Tree::new(entries);
        let id = tree.to_stored_object()?.compute_id();
        Ok((Arc::new(tree), id))
    }

    /// Load the commit `current` points at for the commit node at `path`.
    pub async fn read_commit(&self, path: &str) -> VfsResult<(Arc<Commit>, CommitHashes)> {
        let (entry, resolved) = self.existing(path).await?;
        if entry.mode != EntryMode::Commit {
            return Err(VfsError::InvalidMode {
                path: resolved.path,
                mode: entry.mode,
                expected: "commit",
            });
        }
        let store = &*resolved.store;
        let commit = self.inner.cache.commit(store, &entry.hash).await?;
        let head_tree = match resolved.config.head {
            Some(head) => Some(self.inner.cache.commit(store, &head).await?.tree),
            None => None,
        };
        let hashes = CommitHashes {
            current: entry.hash,
            current_tree: commit.tree,
            head: resolved.config.head,
            head_tree,
        };
        Ok((commit, hashes))
    }

    /// Read a regular or executable file.
    pub async fn read_file(&self, path: &str) -> VfsResult<(Vec<u8>, ObjectId)> {
        let (entry, resolved) = self.existing(path).await?;
        if !entry.mode.is_file() {
            return Err(VfsError::InvalidMode {
                path: resolved.path,
                mode: entry.mode,
                expected: "file",
            });
        }
        let blob = resolved.store.load_blob(&entry.hash).await?;
        Ok((blob.data, entry.hash))
    }

    /// Read a symlink target.
    pub async fn read_link(&self, path: &str) -> VfsResult<(String, ObjectId)> {
        let (entry, resolved) = self.existing(path).await?;
        if entry.mode != EntryMode::Symlink {
            return Err(VfsError::InvalidMode {
                path: resolved.path,
                mode: entry.mode,
                expected: "symlink",
            });
        }
        let blob = resolved.store.load_blob(&entry.hash).await?;
        let target = String::from_utf8(blob.data).map_err(|e| VfsError::InvalidData {
            path: resolved.path.clone(),
            reason: e.to_string(),
        })?;
        Ok((target, entry.hash))
    }

    /// Whether the repository registered at `path` has uncommitted changes.
    /// `None` if nothing is registered there.
    pub fn is_dirty(&self, path: &str) -> Option<bool> {
        let path = paths::normalize(path).ok()?;
        self.state().registry.lookup(&path).map(RepoConfig::is_dirty)
    }

    /// Whether `path` lives in a live-mounted repository.
    pub fn is_live_mount(&self, path: &str) -> VfsResult<bool> {
        let path = paths::normalize_non_empty(path)?;
        let state = self.state();
        let config = state
            .registry
            .lookup(&path)
            .or_else(|| state.registry.owner_of(&path))
            .ok_or_else(|| VfsError::NotFound(path.clone()))?;
        Ok(config.mount == MountKind::LiveMount)
    }

    // ---- writes ----

    /// Queue `entry` (or a deletion, for `None`) at `path`.
    ///
    /// The write joins the open batch as soon as this is called; the
    /// returned future completes when that batch commits or fails. The batch
    /// closes once the future has been polled and the polling task yields,
    /// so a future dropped unpolled waits for the next awaited write.
    pub fn write_entry(
        &self,
        path: &str,
        entry: Option<Entry>,
    ) -> impl Future<Output = VfsResult<()>> + Send + 'static {
        let ticket = self.enqueue(path, entry);
        let vfs = self.clone();
        async move {
            let ticket = ticket?;
            vfs.schedule_flush();
            ticket.await.map_err(|_| VfsError::Closed)?
        }
    }

    /// Queue a deletion of `path`.
    pub fn delete_entry(&self, path: &str) -> impl Future<Output = VfsResult<()>> + Send + 'static {
        self.write_entry(path, None)
    }

    fn enqueue(&self, path: &str, entry: Option<Entry>) -> VfsResult<oneshot::Receiver<VfsResult<()>>> {
        let path = paths::normalize_non_empty(path)?;
        let (tx, rx) = oneshot::channel();
        let mut state = self.state();
        let batch = state.pending.get_or_insert_with(PendingBatch::default);
        batch.writes.insert(path, entry);
        batch.waiters.push(tx);
        if state.phase == Phase::Idle {
            state.phase = Phase::Accumulating;
        }
        Ok(rx)
    }

    /// Spawn the batch driver unless one is already due. A batch that is
    /// committing picks up pending writes itself.
    fn schedule_flush(&self) {
        {
            let mut state = self.state();
            if state.phase != Phase::Accumulating || state.flush_scheduled {
                return;
            }
            state.flush_scheduled = true;
        }
        let vfs = self.clone();
        tokio::spawn(async move { vfs.drive().await });
    }

    /// Write file contents, keeping the executable mode of an existing file.
    pub async fn write_file(&self, path: &str, data: impl Into<Vec<u8>>) -> VfsResult<ObjectId> {
        let resolved = self.read_entry(path).await?;
        let mode = match resolved.entry {
            Some(entry) if entry.mode == EntryMode::Executable => EntryMode::Executable,
            _ => EntryMode::Regular,
        };
        let hash = resolved.store.save(&Object::Blob(Blob::new(data))).await?;
        self.write_entry(&resolved.path, Some(Entry::new(mode, hash)))
            .await?;
        Ok(hash)
    }

    /// Write a symlink pointing at `target`.
    pub async fn write_link(&self, path: &str, target: &str) -> VfsResult<ObjectId> {
        let store = self.store_for(path).await?;
        let hash = store.save(&Object::Blob(Blob::new(target))).await?;
        self.write_entry(path, Some(Entry::new(EntryMode::Symlink, hash)))
            .await?;
        Ok(hash)
    }

    /// Move the repository at `path` back to its head commit.
    pub async fn revert_to_head(&self, path: &str) -> VfsResult<()> {
        let path = paths::normalize_non_empty(path)?;
        let head = {
            let mut state = self.state();
            let config = state
                .registry
                .lookup(&path)
                .ok_or_else(|| VfsError::NotFound(path.clone()))?;
            let head = config
                .head
                .ok_or_else(|| VfsError::NoHeadToRevert(path.clone()))?;
            state.registry.set_current(&path, head);
            head
        };
        debug!(repo = %path, head = %head.short_hex(), "reverting to head");
        self.write_entry(&path, Some(Entry::commit(head))).await
    }

    /// Save a user-authored commit for the repository at `path` and make it
    /// both `current` and `head`. Parents pick up the new commit entry
    /// through a normal write; the branch ref moves once that succeeds.
    pub async fn write_commit(&self, path: &str, commit: Commit) -> VfsResult<ObjectId> {
        let path = paths::normalize_non_empty(path)?;
        let config = self
            .state()
            .registry
            .lookup(&path)
            .cloned()
            .ok_or_else(|| VfsError::NotFound(path.clone()))?;
        let store = self.inner.mounts.open_store(&config)?;
        let hash = store.save(&Object::Commit(commit)).await?;
        self.state().registry.set_head(&path, hash);
        self.write_entry(&path, Some(Entry::commit(hash))).await?;
        self.inner.mounts.update_branch(&config, hash).await?;
        info!(repo = %path, commit = %hash.short_hex(), "commit written");
        Ok(hash)
    }

    /// Save an object into the repository owning `path` without linking it
    /// anywhere. Does not wait for, or join, any batch.
    pub async fn save_as(&self, path: &str, object: &Object) -> VfsResult<ObjectId> {
        let store = self.store_for(path).await?;
        Ok(store.save(object).await?)
    }

    /// Store of the repository registered at `path`, or else of the one
    /// owning its parent directory.
    async fn store_for(&self, path: &str) -> VfsResult<Arc<dyn ObjectStore>> {
        let path = paths::normalize_non_empty(path)?;
        let registered = self.state().registry.lookup(&path).cloned();
        if let Some(config) = registered {
            return self.inner.mounts.open_store(&config);
        }
        let (dir, _) =
            paths::split_parent(&path).ok_or_else(|| VfsError::MissingRepository(path.clone()))?;
        match self.read_entry(dir).await {
            Ok(resolved) => Ok(resolved.store),
            Err(VfsError::NotFound(_)) => Err(VfsError::MissingRepository(path.clone())),
            Err(e) => Err(e),
        }
    }

    /// A free name next to `path`: among root names for a bare root, or
    /// among the parent tree's entries. Returns `path` unchanged when the
    /// parent does not exist yet.
    pub async fn make_unique(&self, path: &str) -> VfsResult<String> {
        let path = paths::normalize_non_empty(path)?;
        let Some((dir, name)) = paths::split_parent(&path) else {
            let state = self.state();
            return Ok(unique_name(&path, |n| state.registry.contains(n)));
        };
        match self.read_tree(dir).await {
            Ok((tree, _)) => Ok(paths::join(dir, &unique_name(name, |n| tree.contains(n)))),
            Err(VfsError::NotFound(_)) => Ok(path.clone()),
            Err(e) => Err(e),
        }
    }

    // ---- batch driver ----

    async fn drive(self) {
        let window = self.inner.config.batch_window();
        if window.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(window).await;
        }

        let mut next = Self::take_batch(&mut self.state());
        while let Some((batch, snapshot)) = next {
            debug!(writes = batch.writes.len(), waiters = batch.waiters.len(), "batch closed");
            let engine = Engine::new(&self.inner.mounts, &self.inner.cache, &self.inner.config);
            let result = engine.run(snapshot, batch.writes).await;
            next = self.finish_batch(result, batch.waiters);
        }
    }

    fn take_batch(state: &mut State) -> Option<(PendingBatch, RootRegistry)> {
        state.flush_scheduled = false;
        match state.pending.take() {
            Some(batch) => {
                state.phase = Phase::Committing;
                Some((batch, state.registry.clone()))
            }
            None => {
                state.phase = Phase::Idle;
                None
            }
        }
    }

    fn finish_batch(
        &self,
        result: VfsResult<Transaction>,
        waiters: Vec<WriteWaiter>,
    ) -> Option<(PendingBatch, RootRegistry)> {
        let mut changes = Vec::new();
        let (queued, snapshot, next) = {
            let mut state = self.state();
            if let Ok(tx) = &result {
                // roots removed while the batch ran stay removed
                for config in &tx.discovered {
                    if state.registry.contains(paths::root_name(&config.name)) {
                        state.registry.adopt(config.clone());
                    }
                }
                for (root, hash) in &tx.currents {
                    if state.registry.set_current(root, *hash) {
                        changes.push(ChangeEvent {
                            root: root.clone(),
                            hash: *hash,
                        });
                    } else {
                        warn!(repo = %root, "repository removed before its batch committed");
                    }
                }
            }
            let queued = std::mem::take(&mut state.read_queues);
            let snapshot = state.registry.clone();
            let next = Self::take_batch(&mut state);
            (queued, snapshot, next)
        };

        match &result {
            Ok(tx) => info!(repos = tx.currents.len(), "batch committed"),
            Err(e) => warn!(error = %e, waiters = waiters.len(), "batch failed"),
        }
        for event in &changes {
            self.inner.bus.publish(event);
        }
        let outcome = result.map(|_| ());
        for waiter in waiters {
            // a dropped waiter only means the caller stopped listening
            let _ = waiter.send(outcome.clone());
        }
        self.release_reads(queued, snapshot);
        next
    }

    fn release_reads(&self, queued: BTreeMap<String, Vec<ReadWaiter>>, snapshot: RootRegistry) {
        for (path, waiters) in queued {
            let vfs = self.clone();
            let snapshot = snapshot.clone();
            tokio::spawn(async move {
                let result = vfs.resolve_in(snapshot, &path).await;
                for waiter in waiters {
                    let _ = waiter.send(result.clone());
                }
            });
        }
    }

    // ---- root lifecycle ----

    /// Mount a repository under a safe, unique version of `name`.
    pub fn add_root(&self, name: &str, config: RepoConfig) -> String {
        self.state().registry.add_root(name, config)
    }

    pub fn rename_root(&self, old: &str, new: &str) -> VfsResult<String> {
        self.state().registry.rename_root(old, new)
    }

    pub fn remove_root(&self, name: &str) -> VfsResult<()> {
        self.state().registry.remove_root(name).map(|_| ())
    }

    pub fn remove_roots_matching(&self, pattern: &Regex) -> Vec<String> {
        self.state().registry.remove_matching(pattern)
    }

    pub fn rename_roots_matching(&self, pattern: &Regex, replacement: &str) -> Vec<(String, String)> {
        self.state().registry.rename_matching(pattern, replacement)
    }

    /// Sorted top-level root names.
    pub fn list_root_names(&self) -> Vec<String> {
        self.state().registry.list_root_names()
    }

    pub fn lookup(&self, name: &str) -> Option<RepoConfig> {
        self.state().registry.lookup(name).cloned()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.state().registry.snapshot()
    }

    /// Clear the registry's dirty flag, returning whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.state().registry.take_dirty()
    }

    // ---- notifications ----

    pub fn subscribe(&self, filter: ChangeFilter) -> ChangeStream {
        self.inner.bus.subscribe(filter)
    }

    /// Number of live change streams.
    pub fn subscriber_count(&self) -> usize {
        self.inner.bus.subscriber_count()
    }

    /// Register a callback for every `(root, new hash)` change.
    pub fn on_change(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) {
        self.inner.bus.on_change(listener);
    }
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Vfs")
            .field("phase", &state.phase)
            .field("roots", &state.registry.list_root_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_store::{
        InMemoryObjectStore, ObjectKind, Signature, StoreError, StoreResult, StoredObject,
        TreeAction,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// In-memory store whose writes can be held back or made to fail.
    #[derive(Default)]
    struct TestStore {
        inner: InMemoryObjectStore,
        held: AtomicBool,
        released: Notify,
        fail_commits: AtomicBool,
        /// Commits accepted before every further commit write fails.
        commit_budget: std::sync::Mutex<Option<usize>>,
    }

    impl TestStore {
        fn hold(&self) {
            self.held.store(true, Ordering::SeqCst);
        }

        fn release(&self) {
            self.held.store(false, Ordering::SeqCst);
            self.released.notify_waiters();
        }
    }

    #[async_trait]
    impl ObjectStore for TestStore {
        async fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
            self.inner.read(id).await
        }

        async fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
            loop {
                let released = self.released.notified();
                if !self.held.load(Ordering::SeqCst) {
                    break;
                }
                released.await;
            }
            if object.kind == ObjectKind::Commit {
                let mut budget = self.commit_budget.lock().unwrap();
                let exhausted = match budget.as_mut() {
                    Some(0) => true,
                    Some(left) => {
                        *left -= 1;
                        false
                    }
                    None => false,
                };
                if exhausted || self.fail_commits.load(Ordering::SeqCst) {
                    return Err(StoreError::Io(std::io::Error::other("disk full")));
                }
            }
            self.inner.write(object).await
        }

        async fn read_ref(&self, name: &str) -> StoreResult<Option<ObjectId>> {
            self.inner.read_ref(name).await
        }

        async fn update_ref(&self, name: &str, id: ObjectId) -> StoreResult<()> {
            self.inner.update_ref(name, id).await
        }
    }

    struct Fixture {
        store: Arc<TestStore>,
        vfs: Vfs,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(VfsConfig::default())
        }

        fn with_config(config: VfsConfig) -> Self {
            let store = Arc::new(TestStore::default());
            let vfs = Vfs::with_store(store.clone(), config);
            Self { store, vfs }
        }

        async fn blob(&self, content: &str) -> ObjectId {
            self.store.save(&Blob::new(content).into()).await.unwrap()
        }

        async fn commit(&self, actions: Vec<TreeAction>, parents: Vec<ObjectId>) -> ObjectId {
            let tree = self.store.create_tree(None, actions).await.unwrap();
            let commit = Commit {
                tree,
                parents,
                author: Signature::now("Ada", "ada@example.com"),
                message: "fixture".into(),
            };
            self.store.save(&Object::Commit(commit)).await.unwrap()
        }

        /// Mount `name` at a fresh commit holding `files`.
        async fn mount(&self, name: &str, files: &[(&str, &str)]) -> ObjectId {
            let mut actions = Vec::new();
            for (path, content) in files {
                actions.push(TreeAction::set(*path, Entry::file(self.blob(content).await)));
            }
            let head = self.commit(actions, vec![]).await;
            let mounted = self
                .vfs
                .add_root(name, RepoConfig::new(MountKind::Local).with_commit(head));
            assert_eq!(mounted, name);
            head
        }

        fn current(&self, name: &str) -> ObjectId {
            self.vfs.lookup(name).unwrap().current.unwrap()
        }
    }

    async fn wait_for_phase(vfs: &Vfs, phase: Phase) {
        while vfs.phase() != phase {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn readme_write_creates_dirty_auto_commit() {
        let fx = Fixture::new();
        let head = fx.mount("proj", &[]).await;

        fx.vfs.write_file("proj/readme.txt", "hello").await.unwrap();

        let config = fx.vfs.lookup("proj").unwrap();
        assert_eq!(config.head, Some(head));
        let current = config.current.unwrap();
        assert_ne!(current, head);
        let commit = fx.store.load_commit(&current).await.unwrap();
        assert_eq!(commit.parents, vec![head]);
        assert_eq!(fx.vfs.is_dirty("proj"), Some(true));

        let (data, _) = fx.vfs.read_file("proj/readme.txt").await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn writes_in_one_turn_share_a_transaction() {
        let fx = Fixture::new();
        fx.mount("proj", &[]).await;
        let mut changes = fx.vfs.subscribe(ChangeFilter::default());
        let commits_before = fx.store.inner.count(ObjectKind::Commit);
        let a = Entry::file(fx.blob("a").await);
        let b = Entry::file(fx.blob("b").await);

        let (ra, rb) = tokio::join!(
            fx.vfs.write_entry("proj/a", Some(a)),
            fx.vfs.write_entry("proj/b", Some(b)),
        );
        ra.unwrap();
        rb.unwrap();

        assert_eq!(fx.store.inner.count(ObjectKind::Commit), commits_before + 1);
        let event = changes.recv().await.unwrap();
        assert_eq!(event.root, "proj");
        assert_eq!(event.hash, fx.current("proj"));
        assert!(changes.try_recv().is_err());
        assert_eq!(fx.vfs.read_entry("proj/a").await.unwrap().entry, Some(a));
        assert_eq!(fx.vfs.read_entry("proj/b").await.unwrap().entry, Some(b));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unawaited_writes_coalesce_on_multi_thread_runtime() {
        let fx = Fixture::new();
        fx.mount("proj", &[]).await;

        for round in 0..20 {
            let mut entries = Vec::new();
            for i in 0..20 {
                entries.push(Entry::file(fx.blob(&format!("{round}-{i}")).await));
            }
            let commits_before = fx.store.inner.count(ObjectKind::Commit);

            let pending: Vec<_> = entries
                .into_iter()
                .enumerate()
                .map(|(i, entry)| fx.vfs.write_entry(&format!("proj/f{i}"), Some(entry)))
                .collect();
            let handles: Vec<_> = pending.into_iter().map(tokio::spawn).collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            assert_eq!(
                fx.store.inner.count(ObjectKind::Commit),
                commits_before + 1,
                "round {round}"
            );
        }
        wait_for_phase(&fx.vfs, Phase::Idle).await;
    }

    #[tokio::test]
    async fn last_write_wins_within_a_batch() {
        let fx = Fixture::new();
        fx.mount("proj", &[]).await;
        let first = Entry::file(fx.blob("first").await);
        let second = Entry::file(fx.blob("second").await);

        let pending = [
            fx.vfs.write_entry("proj/f", Some(first)),
            fx.vfs.write_entry("proj/f", Some(second)),
        ];
        for write in pending {
            write.await.unwrap();
        }
        assert_eq!(fx.vfs.read_entry("proj/f").await.unwrap().entry, Some(second));
    }

    #[tokio::test]
    async fn batch_window_collects_spaced_writes() {
        let fx = Fixture::with_config(VfsConfig {
            batch_window_ms: 200,
            ..VfsConfig::default()
        });
        fx.mount("proj", &[]).await;
        let mut changes = fx.vfs.subscribe(ChangeFilter::under("proj"));
        let a = Entry::file(fx.blob("a").await);

        let first = tokio::spawn(fx.vfs.write_entry("proj/a", Some(a)));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(fx.vfs.phase(), Phase::Accumulating);
        let second = tokio::spawn(fx.vfs.write_entry("proj/b", Some(a)));
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        changes.recv().await.unwrap();
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn reverting_edits_converges_to_head() {
        let fx = Fixture::new();
        let head = fx.mount("proj", &[("notes.txt", "original")]).await;

        fx.vfs.write_file("proj/notes.txt", "edited").await.unwrap();
        assert_eq!(fx.vfs.is_dirty("proj"), Some(true));
        fx.vfs.write_file("proj/notes.txt", "original").await.unwrap();
        assert_eq!(fx.current("proj"), head);
        assert_eq!(fx.vfs.is_dirty("proj"), Some(false));

        fx.vfs.write_file("proj/extra.txt", "x").await.unwrap();
        fx.vfs.revert_to_head("proj").await.unwrap();
        assert_eq!(fx.current("proj"), head);
        assert_eq!(
            fx.vfs.read_entry("proj/extra.txt").await.unwrap().entry,
            None
        );
    }

    #[tokio::test]
    async fn revert_needs_a_head() {
        let fx = Fixture::new();
        fx.vfs.add_root("bare", RepoConfig::new(MountKind::Local));
        assert!(matches!(
            fx.vfs.revert_to_head("bare").await,
            Err(VfsError::NoHeadToRevert(_))
        ));
        assert!(matches!(
            fx.vfs.revert_to_head("ghost").await,
            Err(VfsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reads_during_commit_see_the_result() {
        let fx = Fixture::new();
        let head = fx.mount("proj", &[("readme", "old")]).await;
        let old = fx.vfs.read_entry("proj/readme").await.unwrap().entry;
        let new = Entry::file(fx.blob("new").await);

        fx.store.hold();
        let write = tokio::spawn(fx.vfs.write_entry("proj/readme", Some(new)));
        wait_for_phase(&fx.vfs, Phase::Committing).await;

        let reader = {
            let vfs = fx.vfs.clone();
            tokio::spawn(async move { vfs.read_entry("proj/readme").await })
        };
        // a write issued now belongs to the next batch
        let later = tokio::spawn(fx.vfs.write_entry("proj/later", Some(new)));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!reader.is_finished());
        assert_eq!(fx.current("proj"), head);

        fx.store.release();
        write.await.unwrap().unwrap();
        let seen = reader.await.unwrap().unwrap();
        assert_eq!(seen.entry, Some(new));
        assert_ne!(seen.entry, old);

        later.await.unwrap().unwrap();
        assert_eq!(
            fx.vfs.read_entry("proj/later").await.unwrap().entry,
            Some(new)
        );
        wait_for_phase(&fx.vfs, Phase::Idle).await;
    }

    #[tokio::test]
    async fn failed_batch_fails_every_caller_and_keeps_registry() {
        let fx = Fixture::new();
        let a_head = fx.mount("a", &[]).await;
        let b_head = fx.mount("b", &[]).await;
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        fx.vfs.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let f = Entry::file(fx.blob("f").await);

        fx.store.fail_commits.store(true, Ordering::SeqCst);
        let (ra, rb) = tokio::join!(
            fx.vfs.write_entry("a/f", Some(f)),
            fx.vfs.write_entry("b/f", Some(f)),
        );
        let (ea, eb) = (ra.unwrap_err(), rb.unwrap_err());
        assert!(matches!(ea, VfsError::Store(_)));
        assert_eq!(ea.to_string(), eb.to_string());
        assert_eq!(fx.current("a"), a_head);
        assert_eq!(fx.current("b"), b_head);
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        // the coordinator keeps working afterwards
        fx.store.fail_commits.store(false, Ordering::SeqCst);
        fx.vfs.write_entry("a/f", Some(f)).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parent_failure_after_child_commit_keeps_registry() {
        let fx = Fixture::new();
        let lib = fx.commit(vec![], vec![]).await;
        let parent = fx
            .commit(vec![TreeAction::set("vendor/lib", Entry::commit(lib))], vec![])
            .await;
        fx.vfs
            .add_root("proj", RepoConfig::new(MountKind::Local).with_commit(parent));
        // registers the submodule before the batch runs
        fx.vfs.read_entry("proj/vendor/lib/x").await.unwrap();
        let commits_before = fx.store.inner.count(ObjectKind::Commit);

        *fx.store.commit_budget.lock().unwrap() = Some(1);
        let err = fx
            .vfs
            .write_file("proj/vendor/lib/x", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::Store(_)));

        // the child's commit reached the store but no config moved
        assert_eq!(fx.store.inner.count(ObjectKind::Commit), commits_before + 1);
        assert_eq!(fx.current("proj/vendor/lib"), lib);
        assert_eq!(fx.current("proj"), parent);
        assert_eq!(fx.vfs.is_dirty("proj"), Some(false));
    }

    #[tokio::test]
    async fn removed_root_discoveries_are_dropped() {
        let fx = Fixture::new();
        let lib = fx.commit(vec![], vec![]).await;
        let parent = fx
            .commit(vec![TreeAction::set("vendor/lib", Entry::commit(lib))], vec![])
            .await;
        fx.vfs
            .add_root("proj", RepoConfig::new(MountKind::Local).with_commit(parent));
        let x = Entry::file(fx.blob("x").await);

        fx.store.hold();
        let write = tokio::spawn(fx.vfs.write_entry("proj/vendor/lib/x", Some(x)));
        wait_for_phase(&fx.vfs, Phase::Committing).await;
        fx.vfs.remove_root("proj").unwrap();
        fx.store.release();

        write.await.unwrap().unwrap();
        wait_for_phase(&fx.vfs, Phase::Idle).await;
        assert!(fx.vfs.lookup("proj/vendor/lib").is_none());
        assert!(fx.vfs.lookup("proj").is_none());
        assert!(fx.vfs.list_root_names().is_empty());
    }

    #[tokio::test]
    async fn unknown_root_write_is_rejected() {
        let fx = Fixture::new();
        fx.mount("proj", &[]).await;
        let f = Entry::file(fx.blob("f").await);
        let err = fx.vfs.write_entry("nowhere/f", Some(f)).await.unwrap_err();
        assert!(matches!(err, VfsError::NoRootMatch(_)));
        assert!(matches!(
            fx.vfs.read_entry("nowhere/f").await,
            Err(VfsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn submodule_edits_propagate_to_parent() {
        let fx = Fixture::new();
        let lib = fx
            .commit(vec![TreeAction::set("lib.rs", Entry::file(fx.blob("fn a() {}").await))], vec![])
            .await;
        let parent = fx
            .commit(vec![TreeAction::set("vendor/lib", Entry::commit(lib))], vec![])
            .await;
        fx.vfs
            .add_root("proj", RepoConfig::new(MountKind::Local).with_commit(parent));
        let mut changes = fx.vfs.subscribe(ChangeFilter::under("proj"));

        fx.vfs
            .write_file("proj/vendor/lib/lib.rs", "fn b() {}")
            .await
            .unwrap();

        let child = fx.vfs.lookup("proj/vendor/lib").unwrap();
        let child_current = child.current.unwrap();
        assert_eq!(child.head, Some(lib));
        assert_ne!(child_current, lib);
        let entry = fx.vfs.read_entry("proj/vendor/lib").await.unwrap();
        assert_eq!(entry.entry, Some(Entry::commit(child_current)));
        assert_eq!(fx.vfs.is_dirty("proj"), Some(true));

        let mut roots = vec![
            changes.recv().await.unwrap().root,
            changes.recv().await.unwrap().root,
        ];
        roots.sort();
        assert_eq!(roots, vec!["proj", "proj/vendor/lib"]);
    }

    #[tokio::test]
    async fn write_commit_sets_head_and_updates_parent() {
        let fx = Fixture::new();
        let lib = fx.commit(vec![], vec![]).await;
        let parent = fx
            .commit(vec![TreeAction::set("lib", Entry::commit(lib))], vec![])
            .await;
        fx.vfs
            .add_root("proj", RepoConfig::new(MountKind::Local).with_commit(parent));
        fx.vfs.write_file("proj/lib/new.txt", "n").await.unwrap();
        assert_eq!(fx.vfs.is_dirty("proj/lib"), Some(true));

        let (_, hashes) = fx.vfs.read_commit("proj/lib").await.unwrap();
        assert_eq!(hashes.head, Some(lib));
        let commit = Commit {
            tree: hashes.current_tree,
            parents: vec![lib],
            author: Signature::now("Ada", "ada@example.com"),
            message: "add new.txt".into(),
        };
        let id = fx.vfs.write_commit("proj/lib", commit).await.unwrap();

        assert_eq!(fx.vfs.is_dirty("proj/lib"), Some(false));
        let (commit, hashes) = fx.vfs.read_commit("proj/lib").await.unwrap();
        assert_eq!(commit.message, "add new.txt");
        assert_eq!((hashes.current, hashes.head), (id, Some(id)));
        assert_eq!(hashes.head_tree, Some(hashes.current_tree));
        assert_eq!(
            fx.vfs.read_entry("proj/lib").await.unwrap().entry,
            Some(Entry::commit(id))
        );
        assert_eq!(
            fx.store
                .read_ref("refs/repos/proj/lib/heads/master")
                .await
                .unwrap(),
            Some(id)
        );
    }

    #[tokio::test]
    async fn write_commit_on_root_is_direct_update() {
        let fx = Fixture::new();
        let head = fx.mount("proj", &[]).await;
        let mut changes = fx.vfs.subscribe(ChangeFilter::default());
        let next = Commit {
            tree: fx.store.load_commit(&head).await.unwrap().tree,
            parents: vec![head],
            author: Signature::now("Ada", "ada@example.com"),
            message: "second".into(),
        };
        let id = fx.vfs.write_commit("proj", next).await.unwrap();
        assert_eq!(fx.current("proj"), id);
        assert_eq!(changes.recv().await.unwrap().hash, id);
    }

    #[tokio::test]
    async fn root_tree_lists_top_level_roots() {
        let fx = Fixture::new();
        let head = fx.mount("proj", &[]).await;
        fx.vfs.add_root("later", RepoConfig::new(MountKind::Empty));
        let mut sub = RepoConfig::new(MountKind::Local).with_commit(head);
        sub.name = "proj/sub".into();
        fx.vfs.state().registry.insert(sub);

        let (tree, id) = fx.vfs.read_tree("").await.unwrap();
        let names: Vec<&str> = tree.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["later", "proj"]);
        assert_eq!(tree.get("proj").unwrap().hash, head);
        assert!(tree.get("later").unwrap().hash.is_null());
        assert_eq!(id, tree.to_stored_object().unwrap().compute_id());
    }

    #[tokio::test]
    async fn empty_root_is_expanded_on_first_read() {
        let fx = Fixture::new();
        let name = fx.vfs.add_root("scratch", RepoConfig::new(MountKind::Empty));
        let (tree, _) = fx.vfs.read_tree(&name).await.unwrap();
        assert!(tree.is_empty());
        let config = fx.vfs.lookup("scratch").unwrap();
        assert!(config.current.is_some());
        assert_eq!(config.current, config.head);
    }

    #[tokio::test]
    async fn typed_reads_check_modes() {
        let fx = Fixture::new();
        fx.mount("proj", &[("src/main.rs", "fn main() {}")]).await;

        assert!(matches!(
            fx.vfs.read_file("proj/src").await,
            Err(VfsError::InvalidMode { expected: "file", .. })
        ));
        assert!(matches!(
            fx.vfs.read_tree("proj/src/main.rs").await,
            Err(VfsError::InvalidMode { .. })
        ));
        assert!(matches!(
            fx.vfs.read_commit("proj/src").await,
            Err(VfsError::InvalidMode { expected: "commit", .. })
        ));
        assert!(matches!(
            fx.vfs.read_file("proj/missing").await,
            Err(VfsError::NotFound(_))
        ));
        let (tree, _) = fx.vfs.read_tree("proj").await.unwrap();
        assert!(tree.contains("src"));
    }

    #[tokio::test]
    async fn links_roundtrip_and_files_keep_exec_mode() {
        let fx = Fixture::new();
        fx.mount("proj", &[]).await;
        let script = fx.blob("#!/bin/sh").await;
        fx.vfs
            .write_entry("proj/run.sh", Some(Entry::new(EntryMode::Executable, script)))
            .await
            .unwrap();

        fx.vfs.write_file("proj/run.sh", "#!/bin/sh\necho hi").await.unwrap();
        let entry = fx.vfs.read_entry("proj/run.sh").await.unwrap().entry.unwrap();
        assert_eq!(entry.mode, EntryMode::Executable);

        fx.vfs.write_link("proj/latest", "run.sh").await.unwrap();
        let (target, _) = fx.vfs.read_link("proj/latest").await.unwrap();
        assert_eq!(target, "run.sh");
        assert!(matches!(
            fx.vfs.read_link("proj/run.sh").await,
            Err(VfsError::InvalidMode { .. })
        ));
    }

    #[tokio::test]
    async fn delete_entry_removes_path() {
        let fx = Fixture::new();
        fx.mount("proj", &[("a", "a"), ("b", "b")]).await;
        fx.vfs.delete_entry("proj/a").await.unwrap();
        assert_eq!(fx.vfs.read_entry("proj/a").await.unwrap().entry, None);
        assert!(fx.vfs.read_entry("proj/b").await.unwrap().entry.is_some());
    }

    #[tokio::test]
    async fn make_unique_uses_parent_listing() {
        let fx = Fixture::new();
        fx.mount("proj", &[("docs/a.txt", "a"), ("docs/a.txt-2", "b")]).await;
        assert_eq!(
            fx.vfs.make_unique("proj/docs/a.txt").await.unwrap(),
            "proj/docs/a.txt-3"
        );
        assert_eq!(fx.vfs.make_unique("proj/docs/b.txt").await.unwrap(), "proj/docs/b.txt");
        assert_eq!(fx.vfs.make_unique("proj/new/x").await.unwrap(), "proj/new/x");
        assert_eq!(fx.vfs.make_unique("proj").await.unwrap(), "proj-2");
    }

    #[tokio::test]
    async fn save_as_does_not_link() {
        let fx = Fixture::new();
        let head = fx.mount("proj", &[]).await;
        let id = fx
            .vfs
            .save_as("proj/unlinked", &Blob::new("data").into())
            .await
            .unwrap();
        assert!(fx.store.inner.contains(&id));
        assert_eq!(fx.current("proj"), head);
        assert_eq!(fx.vfs.phase(), Phase::Idle);
        assert!(matches!(
            fx.vfs.save_as("ghost/x", &Blob::new("d").into()).await,
            Err(VfsError::MissingRepository(_))
        ));
    }

    #[tokio::test]
    async fn live_mount_query_uses_owner() {
        let fx = Fixture::new();
        fx.vfs.add_root(
            "site",
            RepoConfig::new(MountKind::LiveMount).with_remote("me/site"),
        );
        fx.mount("proj", &[]).await;
        assert!(fx.vfs.is_live_mount("site/index.html").unwrap());
        assert!(fx.vfs.is_live_mount("site").unwrap());
        assert!(!fx.vfs.is_live_mount("proj/x").unwrap());
        assert!(fx.vfs.is_live_mount("ghost/x").is_err());
    }

    #[tokio::test]
    async fn lifecycle_updates_names_and_dirty_flag() {
        let fx = Fixture::new();
        fx.mount("tmp-a", &[]).await;
        fx.mount("tmp-b", &[]).await;
        fx.mount("keep", &[]).await;
        assert!(fx.vfs.take_dirty());
        assert!(!fx.vfs.take_dirty());

        assert_eq!(fx.vfs.rename_root("keep", "tmp-a").unwrap(), "tmp-a-2");
        let removed = fx.vfs.remove_roots_matching(&Regex::new("^tmp-[ab]$").unwrap());
        assert_eq!(removed, vec!["tmp-a", "tmp-b"]);
        fx.vfs
            .rename_roots_matching(&Regex::new("^tmp-a-2$").unwrap(), "kept");
        assert_eq!(fx.vfs.list_root_names(), vec!["kept"]);
        fx.vfs.remove_root("kept").unwrap();
        assert!(fx.vfs.remove_root("kept").is_err());
        assert!(fx.vfs.take_dirty());
        assert!(fx.vfs.snapshot().roots.is_empty());
    }
}
