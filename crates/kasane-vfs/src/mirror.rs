//! Write-through mirror of a slow store in a fast one.
//!
//! An [`AsyncMirror`] pairs a store that answers synchronously (usually
//! [`MemoryBackend`](crate::MemoryBackend)) with one that only answers
//! asynchronously (a host directory, a remote service). After an initial
//! copy of the slow store into the fast one, every read is served by the
//! fast store and every mutation is applied there first, then queued and
//! replayed against the slow store in submission order by one drain task.
//!
//! ```text
//!  caller ──► sync store ──► queue ──► drain task ──► async store
//!                 ▲
//!  reads ─────────┘
//! ```
//!
//! Replay failures do not stop the drain; they are logged and published to
//! [`AsyncMirror::subscribe_failures`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{VfsError, VfsResult};
use crate::flags::{OpenAction, OpenFlags};
use crate::handle::FileHandle;
use crate::ops::{FileSystem, SyncFileSystem};
use crate::path;
use crate::types::FileAttr;

/// Capacity of the replay-failure broadcast channel.
const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of a mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorState {
    /// Constructed, initial sync not started.
    Uninitialized,
    /// Initial sync in progress.
    Syncing,
    /// Serving calls.
    Ready,
    /// Initial sync failed; the mirror will never serve calls.
    Failed(VfsError),
}

/// A mutation that could not be replayed against the async store.
#[derive(Debug, Clone)]
pub struct ReplayFailure {
    /// Operation name, e.g. `write` or `rename`.
    pub operation: &'static str,
    /// Path the operation targeted.
    pub path: String,
    pub error: VfsError,
}

/// Queued mutation, with arguments already resolved.
#[derive(Debug, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
enum Mutation {
    Create(String),
    Write { path: String, offset: u64, data: Vec<u8> },
    Truncate { path: String, len: u64 },
    Unlink(String),
    Rename { from: String, to: String },
    Mkdir(String),
    Rmdir(String),
    /// Whole-file replacement from a flushed handle.
    Replace { path: String, data: Vec<u8> },
    /// Resolves once everything ahead of it has been replayed.
    Barrier(oneshot::Sender<()>),
}

impl Mutation {
    fn path(&self) -> &str {
        match self {
            Mutation::Create(path)
            | Mutation::Unlink(path)
            | Mutation::Mkdir(path)
            | Mutation::Rmdir(path)
            | Mutation::Write { path, .. }
            | Mutation::Truncate { path, .. }
            | Mutation::Replace { path, .. } => path,
            Mutation::Rename { from, .. } => from,
            Mutation::Barrier(_) => "",
        }
    }

    async fn replay(&self, store: &dyn FileSystem) -> VfsResult<()> {
        match self {
            Mutation::Create(path) => store.create(path).await.map(|_| ()),
            Mutation::Write { path, offset, data } => {
                store.write(path, *offset, data).await.map(|_| ())
            }
            Mutation::Truncate { path, len } => store.truncate(path, *len).await,
            Mutation::Unlink(path) => store.unlink(path).await,
            Mutation::Rename { from, to } => store.rename(from, to).await,
            Mutation::Mkdir(path) => store.mkdir(path).await,
            Mutation::Rmdir(path) => store.rmdir(path).await,
            Mutation::Replace { path, data } => store.write_file(path, data).await,
            Mutation::Barrier(_) => Ok(()),
        }
    }
}

/// Fast store fronting a slow one, with ordered write-through.
pub struct AsyncMirror {
    sync_store: Arc<dyn FileSystem>,
    async_store: Arc<dyn FileSystem>,
    state: watch::Sender<MirrorState>,
    /// Held while a mutation is applied and enqueued, so queue order matches
    /// the order mutations hit the sync store.
    queue: Mutex<Option<mpsc::UnboundedSender<Mutation>>>,
    pending: Arc<AtomicUsize>,
    failures: broadcast::Sender<ReplayFailure>,
}

impl std::fmt::Debug for AsyncMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncMirror")
            .field("sync_store", &self.sync_store.name())
            .field("async_store", &self.async_store.name())
            .field("state", &*self.state.borrow())
            .field("pending", &self.pending())
            .finish()
    }
}

impl AsyncMirror {
    /// Pair two stores without syncing them yet.
    ///
    /// The sync store must offer the synchronous convention and neither
    /// store may be read-only.
    pub fn new(sync_store: Arc<dyn FileSystem>, async_store: Arc<dyn FileSystem>) -> VfsResult<Self> {
        if !sync_store.supports_synch() {
            return Err(VfsError::not_supported(format!(
                "{} cannot serve as the sync store of a mirror",
                sync_store.name()
            )));
        }
        for store in [&sync_store, &async_store] {
            if store.is_read_only() {
                return Err(VfsError::permission_denied(format!(
                    "{} is read-only and cannot be mirrored",
                    store.name()
                )));
            }
        }

        let (state, _) = watch::channel(MirrorState::Uninitialized);
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Ok(Self {
            sync_store,
            async_store,
            state,
            queue: Mutex::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
            failures,
        })
    }

    /// Construct and initialize in one step.
    pub async fn create(
        sync_store: Arc<dyn FileSystem>,
        async_store: Arc<dyn FileSystem>,
    ) -> VfsResult<Self> {
        let mirror = Self::new(sync_store, async_store)?;
        mirror.initialize().await?;
        Ok(mirror)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MirrorState {
        self.state.borrow().clone()
    }

    /// Number of mutations waiting to be replayed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Receive every replay failure from now on.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<ReplayFailure> {
        self.failures.subscribe()
    }

    /// Copy the async store into the sync store and start the drain task.
    ///
    /// Must be called from within a tokio runtime. A second call waits for
    /// the first to finish and reports the same outcome.
    pub async fn initialize(&self) -> VfsResult<()> {
        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == MirrorState::Uninitialized {
                *state = MirrorState::Syncing;
                started = true;
                true
            } else {
                false
            }
        });
        if !started {
            return self.ready().await;
        }

        if let Err(cause) = self.initial_sync().await {
            warn!(error = %cause, "mirror initial sync failed");
            self.state.send_replace(MirrorState::Failed(cause.clone()));
            return Err(cause);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(
            Arc::clone(&self.async_store),
            rx,
            Arc::clone(&self.pending),
            self.failures.clone(),
        ));
        *self.queue.lock() = Some(tx);
        self.state.send_replace(MirrorState::Ready);
        Ok(())
    }

    #[tracing::instrument(skip(self), name = "mirror.initial_sync", fields(from = self.async_store.name()))]
    async fn initial_sync(&self) -> VfsResult<()> {
        let fast = self.fast()?;
        let mut dirs = 0usize;
        let mut files = 0usize;
        let mut stack = vec!["/".to_string()];

        while let Some(dir) = stack.pop() {
            for name in self.async_store.readdir(&dir).await? {
                let child = path::join(&dir, &name);
                if self.async_store.stat(&child).await?.is_dir() {
                    if !fast.exists_sync(&child) {
                        fast.mkdir_sync(&child)?;
                    }
                    dirs += 1;
                    stack.push(child);
                } else {
                    let data = self.async_store.read_file(&child).await?;
                    fast.write_file_sync(&child, &data)?;
                    files += 1;
                }
            }
        }

        info!(dirs, files, "mirror initial sync complete");
        Ok(())
    }

    /// Wait until every mutation enqueued before this call has been
    /// replayed against the async store.
    pub async fn drained(&self) {
        let (tx, rx) = oneshot::channel();
        let sent = match self.queue.lock().as_ref() {
            Some(queue) => queue.send(Mutation::Barrier(tx)).is_ok(),
            None => false,
        };
        if sent {
            // The drain task only drops a barrier when it stops
            let _ = rx.await;
        }
    }

    fn fast(&self) -> VfsResult<&dyn SyncFileSystem> {
        self.sync_store.as_sync().ok_or_else(|| {
            VfsError::not_supported(format!(
                "{} has no synchronous calls",
                self.sync_store.name()
            ))
        })
    }

    fn failed(cause: &VfsError) -> VfsError {
        VfsError::io(format!("mirror initial sync failed: {}", cause))
    }

    /// Gate for synchronous calls: the mirror must be ready right now.
    fn ready_sync(&self) -> VfsResult<&dyn SyncFileSystem> {
        match &*self.state.borrow() {
            MirrorState::Ready => {}
            MirrorState::Failed(cause) => return Err(Self::failed(cause)),
            MirrorState::Uninitialized | MirrorState::Syncing => {
                return Err(VfsError::not_supported("mirror is not ready yet"));
            }
        }
        self.fast()
    }

    /// Gate for asynchronous calls: waits out an initial sync in progress.
    async fn ready(&self) -> VfsResult<()> {
        let mut state = self.state.subscribe();
        let settled = state
            .wait_for(|s| *s != MirrorState::Syncing)
            .await
            .map_err(|_| VfsError::io("mirror state channel closed"))?;
        match &*settled {
            MirrorState::Ready => Ok(()),
            MirrorState::Failed(cause) => Err(Self::failed(cause)),
            _ => Err(VfsError::not_supported("mirror has not been initialized")),
        }
    }

    /// Apply a mutation to the sync store and queue it for replay.
    fn write_through<T>(
        &self,
        apply: impl FnOnce(&dyn SyncFileSystem) -> VfsResult<T>,
        mutation: Mutation,
    ) -> VfsResult<T> {
        let fast = self.ready_sync()?;
        let queue = self.queue.lock();
        let out = apply(fast)?;
        self.enqueue(queue.as_ref(), mutation);
        Ok(out)
    }

    fn enqueue(&self, queue: Option<&mpsc::UnboundedSender<Mutation>>, mutation: Mutation) {
        let operation: &'static str = (&mutation).into();
        let target = mutation.path().to_string();
        self.pending.fetch_add(1, Ordering::SeqCst);
        let sent = queue.is_some_and(|q| q.send(mutation).is_ok());
        if sent {
            debug!(operation, path = %target, "queued for write-through");
        } else {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(operation, path = %target, "write-through queue closed, mutation dropped");
        }
    }
}

/// Replay queued mutations in order until every sender is gone.
async fn drain(
    store: Arc<dyn FileSystem>,
    mut queue: mpsc::UnboundedReceiver<Mutation>,
    pending: Arc<AtomicUsize>,
    failures: broadcast::Sender<ReplayFailure>,
) {
    while let Some(mutation) = queue.recv().await {
        if let Mutation::Barrier(done) = mutation {
            let _ = done.send(());
            continue;
        }

        let result = mutation.replay(store.as_ref()).await;
        pending.fetch_sub(1, Ordering::SeqCst);
        if let Err(error) = result {
            let operation: &'static str = (&mutation).into();
            warn!(operation, path = mutation.path(), %error, "write-through replay failed");
            // No subscribers is fine
            let _ = failures.send(ReplayFailure {
                operation,
                path: mutation.path().to_string(),
                error,
            });
        }
    }
    debug!("write-through drain stopped");
}

#[async_trait]
impl FileSystem for AsyncMirror {
    fn name(&self) -> &str {
        "AsyncMirror"
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn as_sync(&self) -> Option<&dyn SyncFileSystem> {
        Some(self)
    }

    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        self.ready().await?;
        self.stat_sync(path)
    }

    async fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Arc<FileHandle>> {
        self.ready().await?;
        self.open_sync(path, flags)
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<String>> {
        self.ready().await?;
        self.readdir_sync(path)
    }

    async fn create(&self, path: &str) -> VfsResult<FileAttr> {
        self.ready().await?;
        self.create_sync(path)
    }

    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<usize> {
        self.ready().await?;
        self.write_sync(path, offset, data)
    }

    async fn truncate(&self, path: &str, len: u64) -> VfsResult<()> {
        self.ready().await?;
        self.truncate_sync(path, len)
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        self.ready().await?;
        self.unlink_sync(path)
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.ready().await?;
        self.rename_sync(from, to)
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.ready().await?;
        self.mkdir_sync(path)
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        self.ready().await?;
        self.rmdir_sync(path)
    }

    async fn flush(&self, path: &str, handle: &FileHandle) -> VfsResult<()> {
        self.ready().await?;
        self.flush_sync(path, handle)
    }
}

impl SyncFileSystem for AsyncMirror {
    fn stat_sync(&self, path: &str) -> VfsResult<FileAttr> {
        self.ready_sync()?.stat_sync(path)
    }

    fn open_sync(&self, path: &str, flags: OpenFlags) -> VfsResult<Arc<FileHandle>> {
        let fast = self.ready_sync()?;
        let normalized = path::normalize(path);
        let queue = self.queue.lock();

        let action = flags.resolve(fast.exists_sync(&normalized));
        let handle = fast.open_sync(&normalized, flags)?;
        match action {
            OpenAction::CreateFile => {
                self.enqueue(queue.as_ref(), Mutation::Create(normalized));
            }
            OpenAction::Truncate => {
                self.enqueue(
                    queue.as_ref(),
                    Mutation::Truncate {
                        path: normalized,
                        len: 0,
                    },
                );
            }
            _ => {}
        }
        Ok(handle)
    }

    fn readdir_sync(&self, path: &str) -> VfsResult<Vec<String>> {
        self.ready_sync()?.readdir_sync(path)
    }

    fn create_sync(&self, path: &str) -> VfsResult<FileAttr> {
        let normalized = path::normalize(path);
        self.write_through(
            |fast| fast.create_sync(&normalized),
            Mutation::Create(normalized.clone()),
        )
    }

    fn write_sync(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let normalized = path::normalize(path);
        self.write_through(
            |fast| fast.write_sync(&normalized, offset, data),
            Mutation::Write {
                path: normalized.clone(),
                offset,
                data: data.to_vec(),
            },
        )
    }

    fn truncate_sync(&self, path: &str, len: u64) -> VfsResult<()> {
        let normalized = path::normalize(path);
        self.write_through(
            |fast| fast.truncate_sync(&normalized, len),
            Mutation::Truncate {
                path: normalized.clone(),
                len,
            },
        )
    }

    fn unlink_sync(&self, path: &str) -> VfsResult<()> {
        let normalized = path::normalize(path);
        self.write_through(
            |fast| fast.unlink_sync(&normalized),
            Mutation::Unlink(normalized.clone()),
        )
    }

    fn rename_sync(&self, from: &str, to: &str) -> VfsResult<()> {
        let from = path::normalize(from);
        let to = path::normalize(to);
        self.write_through(
            |fast| fast.rename_sync(&from, &to),
            Mutation::Rename {
                from: from.clone(),
                to: to.clone(),
            },
        )
    }

    fn mkdir_sync(&self, path: &str) -> VfsResult<()> {
        let normalized = path::normalize(path);
        self.write_through(
            |fast| fast.mkdir_sync(&normalized),
            Mutation::Mkdir(normalized.clone()),
        )
    }

    fn rmdir_sync(&self, path: &str) -> VfsResult<()> {
        let normalized = path::normalize(path);
        self.write_through(
            |fast| fast.rmdir_sync(&normalized),
            Mutation::Rmdir(normalized.clone()),
        )
    }

    fn flush_sync(&self, path: &str, handle: &FileHandle) -> VfsResult<()> {
        if !handle.is_dirty() {
            return Ok(());
        }
        let normalized = path::normalize(path);
        self.write_through(
            |fast| fast.flush_sync(&normalized, handle),
            Mutation::Replace {
                path: normalized.clone(),
                data: handle.contents(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{LocalBackend, MemoryBackend};
    use crate::ErrorKind;
    use std::time::Duration;

    /// Async-only store with injectable failures.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryBackend,
        fail_listing: bool,
        poison: Option<&'static str>,
        delay: Option<Duration>,
    }

    impl FlakyStore {
        fn check(&self, path: &str) -> VfsResult<()> {
            match self.poison {
                Some(p) if path.contains(p) => Err(VfsError::io(format!("injected failure at {path}"))),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl FileSystem for FlakyStore {
        fn name(&self) -> &str {
            "Flaky"
        }
        fn is_read_only(&self) -> bool {
            false
        }
        async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
            self.inner.stat_sync(path)
        }
        async fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Arc<FileHandle>> {
            self.inner.open_sync(path, flags)
        }
        async fn readdir(&self, path: &str) -> VfsResult<Vec<String>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_listing {
                return Err(VfsError::io("listing unavailable"));
            }
            self.inner.readdir_sync(path)
        }
        async fn create(&self, path: &str) -> VfsResult<FileAttr> {
            self.check(path)?;
            self.inner.create_sync(path)
        }
        async fn write(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<usize> {
            self.check(path)?;
            self.inner.write_sync(path, offset, data)
        }
        async fn truncate(&self, path: &str, len: u64) -> VfsResult<()> {
            self.check(path)?;
            self.inner.truncate_sync(path, len)
        }
        async fn unlink(&self, path: &str) -> VfsResult<()> {
            self.inner.unlink_sync(path)
        }
        async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
            self.inner.rename_sync(from, to)
        }
        async fn mkdir(&self, path: &str) -> VfsResult<()> {
            self.check(path)?;
            self.inner.mkdir_sync(path)
        }
        async fn rmdir(&self, path: &str) -> VfsResult<()> {
            self.inner.rmdir_sync(path)
        }
    }

    fn seeded() -> FlakyStore {
        let store = FlakyStore::default();
        store.inner.mkdir_sync("/docs").unwrap();
        store.inner.mkdir_sync("/docs/deep").unwrap();
        store.inner.write_file_sync("/readme", b"top").unwrap();
        store.inner.write_file_sync("/docs/deep/note", b"nested").unwrap();
        store
    }

    #[tokio::test]
    async fn test_new_checks_capabilities() {
        let dir = tempfile::TempDir::new().unwrap();
        let local: Arc<dyn FileSystem> = Arc::new(LocalBackend::new(dir.path()));
        let memory: Arc<dyn FileSystem> = Arc::new(MemoryBackend::new());

        let err = AsyncMirror::new(Arc::clone(&local), Arc::clone(&memory)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);

        let read_only: Arc<dyn FileSystem> = Arc::new(LocalBackend::read_only(dir.path()));
        let err = AsyncMirror::new(Arc::clone(&memory), read_only).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        assert!(AsyncMirror::new(memory, local).is_ok());
    }

    #[tokio::test]
    async fn test_calls_before_initialize() {
        let mirror = AsyncMirror::new(Arc::new(MemoryBackend::new()), Arc::new(seeded())).unwrap();
        assert_eq!(mirror.state(), MirrorState::Uninitialized);

        assert_eq!(mirror.stat_sync("/").unwrap_err().kind(), ErrorKind::NotSupported);
        assert_eq!(mirror.stat("/").await.unwrap_err().kind(), ErrorKind::NotSupported);
        assert_eq!(
            mirror.create_sync("/x").unwrap_err().kind(),
            ErrorKind::NotSupported
        );
    }

    #[tokio::test]
    async fn test_initial_sync_copies_everything() {
        let sync = Arc::new(MemoryBackend::new());
        let mirror = AsyncMirror::create(sync.clone(), Arc::new(seeded())).await.unwrap();
        assert_eq!(mirror.state(), MirrorState::Ready);

        assert_eq!(sync.read_file_sync("/readme").unwrap(), b"top");
        assert_eq!(sync.read_file_sync("/docs/deep/note").unwrap(), b"nested");
        assert_eq!(mirror.readdir_sync("/").unwrap(), vec!["docs", "readme"]);
        assert_eq!(mirror.pending(), 0);
    }

    #[tokio::test]
    async fn test_initial_sync_failure_is_terminal() {
        let store = FlakyStore {
            fail_listing: true,
            ..seeded()
        };
        let mirror = AsyncMirror::new(Arc::new(MemoryBackend::new()), Arc::new(store)).unwrap();

        let err = mirror.initialize().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(matches!(mirror.state(), MirrorState::Failed(_)));

        assert_eq!(mirror.stat_sync("/").unwrap_err().kind(), ErrorKind::IoError);
        let err = mirror.readdir("/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(err.to_string().contains("listing unavailable"));
        assert_eq!(mirror.initialize().await.unwrap_err().kind(), ErrorKind::IoError);
    }

    #[tokio::test]
    async fn test_mutations_converge_after_drain() {
        let slow = Arc::new(seeded());
        let mirror = AsyncMirror::create(Arc::new(MemoryBackend::new()), slow.clone())
            .await
            .unwrap();

        mirror.mkdir("/out").await.unwrap();
        mirror.write_file("/out/a.txt", b"first").await.unwrap();
        mirror.write("/out/a.txt", 5, b" second").await.unwrap();
        mirror.rename("/readme", "/out/readme").await.unwrap();
        mirror.unlink("/docs/deep/note").await.unwrap();
        mirror.rmdir("/docs/deep").await.unwrap();

        // Reads are served by the sync store straight away
        assert_eq!(mirror.read_file_sync("/out/a.txt").unwrap(), b"first second");

        mirror.drained().await;
        assert_eq!(mirror.pending(), 0);
        assert_eq!(slow.inner.read_file_sync("/out/a.txt").unwrap(), b"first second");
        assert_eq!(slow.inner.read_file_sync("/out/readme").unwrap(), b"top");
        assert!(!slow.inner.exists_sync("/readme"));
        assert!(!slow.inner.exists_sync("/docs/deep"));
        assert_eq!(slow.inner.readdir_sync("/docs").unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_open_and_flush_write_through() {
        let slow = Arc::new(FlakyStore::default());
        let mirror = AsyncMirror::create(Arc::new(MemoryBackend::new()), slow.clone())
            .await
            .unwrap();

        let handle = mirror.open("/log", "a+".parse().unwrap()).await.unwrap();
        handle.write(0, b"one\n").unwrap();
        mirror.flush("/log", &handle).await.unwrap();
        handle.write(0, b"two\n").unwrap();
        mirror.flush("/log", &handle).await.unwrap();

        mirror.drained().await;
        assert_eq!(slow.inner.read_file_sync("/log").unwrap(), b"one\ntwo\n");

        mirror.open("/log", OpenFlags::write()).await.unwrap();
        mirror.drained().await;
        assert!(slow.inner.read_file_sync("/log").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_sync_store_call_is_not_queued() {
        let mirror = AsyncMirror::create(Arc::new(MemoryBackend::new()), Arc::new(FlakyStore::default()))
            .await
            .unwrap();

        let err = mirror.create("/missing/parent").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(mirror.pending(), 0);
    }

    #[tokio::test]
    async fn test_replay_failures_are_published() {
        let slow = Arc::new(FlakyStore {
            poison: Some("poison"),
            ..Default::default()
        });
        let mirror = AsyncMirror::create(Arc::new(MemoryBackend::new()), slow.clone())
            .await
            .unwrap();
        let mut failures = mirror.subscribe_failures();

        mirror.create("/poison").await.unwrap();
        mirror.create("/fine").await.unwrap();
        mirror.drained().await;

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.operation, "create");
        assert_eq!(failure.path, "/poison");
        assert_eq!(failure.error.kind(), ErrorKind::IoError);

        // The drain kept going and the sync store kept the change
        assert!(slow.inner.exists_sync("/fine"));
        assert!(mirror.exists_sync("/poison"));
    }

    #[tokio::test]
    async fn test_async_calls_wait_for_sync() {
        let slow = FlakyStore {
            delay: Some(Duration::from_millis(50)),
            ..seeded()
        };
        let mirror = Arc::new(AsyncMirror::new(Arc::new(MemoryBackend::new()), Arc::new(slow)).unwrap());

        let init = tokio::spawn({
            let mirror = Arc::clone(&mirror);
            async move { mirror.initialize().await }
        });
        while mirror.state() == MirrorState::Uninitialized {
            tokio::task::yield_now().await;
        }

        assert_eq!(mirror.stat_sync("/readme").unwrap_err().kind(), ErrorKind::NotSupported);
        assert_eq!(mirror.read_file("/readme").await.unwrap(), b"top");
        init.await.unwrap().unwrap();
    }
}
