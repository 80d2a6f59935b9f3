//! Read-only store served from a [`FileIndex`].
//!
//! The tree shape comes entirely from the index; file bytes come from a
//! [`ContentSource`] on first open and stay attached to the index until
//! [`IndexedFileSystem::empty`] releases them.

use async_trait::async_trait;
use parking_lot::{RwLock, RwLockReadGuard};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::error::{VfsError, VfsResult};
use crate::flags::{OpenAction, OpenFlags};
use crate::handle::FileHandle;
use crate::index::{FileIndex, Inode};
use crate::ops::{FileSystem, SyncFileSystem};
use crate::path;
use crate::types::FileAttr;

/// Where an indexed store fetches file bytes from.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the full content of the file at `path`.
    async fn fetch(&self, path: &str) -> VfsResult<Vec<u8>>;

    /// Size of the file at `path`, without fetching it.
    async fn size(&self, path: &str) -> VfsResult<u64>;

    /// Returns true if the blocking variants are implemented.
    fn supports_blocking(&self) -> bool {
        false
    }

    /// Blocking [`ContentSource::fetch`].
    fn fetch_blocking(&self, path: &str) -> VfsResult<Vec<u8>> {
        Err(VfsError::not_supported(format!(
            "blocking fetch of {}",
            path
        )))
    }

    /// Blocking [`ContentSource::size`].
    fn size_blocking(&self, path: &str) -> VfsResult<u64> {
        Err(VfsError::not_supported(format!("blocking size of {}", path)))
    }
}

/// Content served from a host directory laid out like the index.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn host_path(&self, vfs_path: &str) -> PathBuf {
        let mut full = self.root.clone();
        for segment in path::segments(vfs_path) {
            full.push(segment);
        }
        full
    }
}

#[async_trait]
impl ContentSource for DirectorySource {
    async fn fetch(&self, path: &str) -> VfsResult<Vec<u8>> {
        tokio::fs::read(self.host_path(path))
            .await
            .map_err(|e| VfsError::host(&path::normalize(path), e))
    }

    async fn size(&self, path: &str) -> VfsResult<u64> {
        let meta = tokio::fs::metadata(self.host_path(path))
            .await
            .map_err(|e| VfsError::host(&path::normalize(path), e))?;
        Ok(meta.len())
    }

    fn supports_blocking(&self) -> bool {
        true
    }

    fn fetch_blocking(&self, path: &str) -> VfsResult<Vec<u8>> {
        std::fs::read(self.host_path(path)).map_err(|e| VfsError::host(&path::normalize(path), e))
    }

    fn size_blocking(&self, path: &str) -> VfsResult<u64> {
        let meta = std::fs::metadata(self.host_path(path))
            .map_err(|e| VfsError::host(&path::normalize(path), e))?;
        Ok(meta.len())
    }
}

/// Outcome of looking a path up before any fetch.
enum Lookup {
    Known(FileAttr),
    UnknownSize,
}

/// Read-only filesystem over a [`FileIndex`].
pub struct IndexedFileSystem<S> {
    index: RwLock<FileIndex>,
    source: S,
}

impl<S: ContentSource> IndexedFileSystem<S> {
    pub fn new(index: FileIndex, source: S) -> Self {
        Self {
            index: RwLock::new(index),
            source,
        }
    }

    /// Read access to the underlying index.
    pub fn index(&self) -> RwLockReadGuard<'_, FileIndex> {
        self.index.read()
    }

    /// Attach known content to the file at `path` ahead of any open.
    pub fn preload_file(&self, path: &str, bytes: Vec<u8>) -> VfsResult<()> {
        self.index.write().preload(path, bytes)
    }

    /// Release every cached content handle.
    ///
    /// Returns the number of handles released.
    pub fn empty(&self) -> usize {
        let released = self.index.write().evict_all();
        debug!(released, "indexed store emptied");
        released
    }

    fn lookup(&self, normalized: &str) -> VfsResult<Lookup> {
        match self.index.read().resolve(normalized) {
            None => Err(VfsError::not_found(normalized)),
            Some(Inode::Dir(d)) => Ok(Lookup::Known(d.attr())),
            Some(Inode::File(f)) if f.size().is_some() => Ok(Lookup::Known(f.attr())),
            Some(Inode::File(_)) => Ok(Lookup::UnknownSize),
        }
    }

    fn record_size(&self, normalized: &str, size: u64) -> VfsResult<FileAttr> {
        let mut index = self.index.write();
        index.set_size(normalized, size)?;
        index
            .attr(normalized)
            .ok_or_else(|| VfsError::not_found(normalized))
    }

    /// Apply the open decision table; `Ok(None)` means content must be fetched.
    fn cached_handle(&self, normalized: &str, flags: OpenFlags) -> VfsResult<Option<Arc<FileHandle>>> {
        let index = self.index.read();
        let file = match index.resolve(normalized) {
            None => return Err(VfsError::not_found(normalized)),
            Some(Inode::Dir(_)) => return Err(VfsError::is_a_directory(normalized)),
            Some(Inode::File(f)) => f,
        };
        match flags.resolve(true).into_result(normalized)? {
            OpenAction::Reuse => Ok(file.handle().cloned()),
            _ => Err(VfsError::already_exists(normalized)),
        }
    }

    fn attach_fetched(&self, normalized: &str, flags: OpenFlags, bytes: Vec<u8>) -> VfsResult<Arc<FileHandle>> {
        let mut index = self.index.write();
        let file = index
            .file_mut(normalized)
            .ok_or_else(|| VfsError::not_found(normalized))?;

        // A concurrent open may have attached first
        if let Some(existing) = file.handle() {
            return Ok(Arc::clone(existing));
        }
        let handle = Arc::new(FileHandle::new(normalized, flags, file.attr(), bytes));
        index.attach(normalized, Arc::clone(&handle))?;
        debug!(path = normalized, size = handle.size(), "attached fetched content");
        Ok(handle)
    }
}

#[async_trait]
impl<S: ContentSource> FileSystem for IndexedFileSystem<S> {
    fn name(&self) -> &str {
        "Indexed"
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn as_sync(&self) -> Option<&dyn SyncFileSystem> {
        if self.source.supports_blocking() {
            Some(self)
        } else {
            None
        }
    }

    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let normalized = path::normalize(path);
        match self.lookup(&normalized)? {
            Lookup::Known(attr) => Ok(attr),
            Lookup::UnknownSize => {
                let size = self.source.size(&normalized).await?;
                self.record_size(&normalized, size)
            }
        }
    }

    async fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Arc<FileHandle>> {
        let normalized = path::normalize(path);
        if let Some(handle) = self.cached_handle(&normalized, flags)? {
            debug!(path = %normalized, "reusing cached handle");
            return Ok(handle);
        }
        let bytes = self.source.fetch(&normalized).await?;
        self.attach_fetched(&normalized, flags, bytes)
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<String>> {
        self.index.read().list(path)
    }

    async fn create(&self, path: &str) -> VfsResult<FileAttr> {
        Err(VfsError::read_only(path::normalize(path)))
    }

    async fn write(&self, path: &str, _offset: u64, _data: &[u8]) -> VfsResult<usize> {
        Err(VfsError::read_only(path::normalize(path)))
    }

    async fn truncate(&self, path: &str, _len: u64) -> VfsResult<()> {
        Err(VfsError::read_only(path::normalize(path)))
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::read_only(path::normalize(path)))
    }

    async fn rename(&self, from: &str, _to: &str) -> VfsResult<()> {
        Err(VfsError::read_only(path::normalize(from)))
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::read_only(path::normalize(path)))
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::read_only(path::normalize(path)))
    }

    async fn flush(&self, _path: &str, _handle: &FileHandle) -> VfsResult<()> {
        Ok(())
    }
}

impl<S: ContentSource> SyncFileSystem for IndexedFileSystem<S> {
    fn stat_sync(&self, path: &str) -> VfsResult<FileAttr> {
        let normalized = path::normalize(path);
        match self.lookup(&normalized)? {
            Lookup::Known(attr) => Ok(attr),
            Lookup::UnknownSize => {
                let size = self.source.size_blocking(&normalized)?;
                self.record_size(&normalized, size)
            }
        }
    }

    fn open_sync(&self, path: &str, flags: OpenFlags) -> VfsResult<Arc<FileHandle>> {
        let normalized = path::normalize(path);
        if let Some(handle) = self.cached_handle(&normalized, flags)? {
            return Ok(handle);
        }
        let bytes = self.source.fetch_blocking(&normalized)?;
        self.attach_fetched(&normalized, flags, bytes)
    }

    fn readdir_sync(&self, path: &str) -> VfsResult<Vec<String>> {
        self.index.read().list(path)
    }

    fn create_sync(&self, path: &str) -> VfsResult<FileAttr> {
        Err(VfsError::read_only(path::normalize(path)))
    }

    fn write_sync(&self, path: &str, _offset: u64, _data: &[u8]) -> VfsResult<usize> {
        Err(VfsError::read_only(path::normalize(path)))
    }

    fn truncate_sync(&self, path: &str, _len: u64) -> VfsResult<()> {
        Err(VfsError::read_only(path::normalize(path)))
    }

    fn unlink_sync(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::read_only(path::normalize(path)))
    }

    fn rename_sync(&self, from: &str, _to: &str) -> VfsResult<()> {
        Err(VfsError::read_only(path::normalize(from)))
    }

    fn mkdir_sync(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::read_only(path::normalize(path)))
    }

    fn rmdir_sync(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::read_only(path::normalize(path)))
    }

    fn flush_sync(&self, _path: &str, _handle: &FileHandle) -> VfsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ListingNode;
    use crate::ErrorKind;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source with fixed content that counts its calls.
    #[derive(Default)]
    struct CountingSource {
        files: HashMap<String, Vec<u8>>,
        fetches: AtomicUsize,
        probes: AtomicUsize,
    }

    impl CountingSource {
        fn with(files: &[(&str, &[u8])]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(p, d)| (p.to_string(), d.to_vec()))
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ContentSource for CountingSource {
        async fn fetch(&self, path: &str) -> VfsResult<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| VfsError::not_found(path))
        }

        async fn size(&self, path: &str) -> VfsResult<u64> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(path)
                .map(|d| d.len() as u64)
                .ok_or_else(|| VfsError::not_found(path))
        }
    }

    fn store() -> IndexedFileSystem<CountingSource> {
        let index = FileIndex::from_listing(&ListingNode::directory(
            "",
            vec![
                ListingNode::file("a.txt", Some(5)),
                ListingNode::directory("lib", vec![ListingNode::file("lazy.js", None)]),
            ],
        ))
        .unwrap();
        let source = CountingSource::with(&[("/a.txt", b"hello"), ("/lib/lazy.js", b"let x = 1;")]);
        IndexedFileSystem::new(index, source)
    }

    #[tokio::test]
    async fn test_stat_and_readdir() {
        let fs = store();
        assert_eq!(fs.stat("/a.txt").await.unwrap().size, 5);
        assert!(fs.stat("/lib").await.unwrap().is_dir());
        assert!(fs.stat("/").await.unwrap().is_dir());
        assert_eq!(fs.stat("/missing").await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(fs.readdir("/").await.unwrap(), vec!["a.txt", "lib"]);
    }

    #[tokio::test]
    async fn test_unknown_size_probed_once() {
        let fs = store();
        assert_eq!(fs.stat("/lib/lazy.js").await.unwrap().size, 10);
        assert_eq!(fs.stat("/lib/lazy.js").await.unwrap().size, 10);
        assert_eq!(fs.source.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_opens_share_one_handle() {
        let fs = store();
        let first = fs.open("/a.txt", OpenFlags::read()).await.unwrap();
        let second = fs.open("/a.txt", OpenFlags::read()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.contents(), b"hello");
        assert_eq!(fs.source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reuse_keeps_first_flags() {
        let fs = store();
        let first = fs.open("/a.txt", OpenFlags::read()).await.unwrap();
        let second = fs.open("/a.txt", OpenFlags::read_write()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.flags(), OpenFlags::read());
    }

    #[tokio::test]
    async fn test_open_errors() {
        let fs = store();
        let kind = |r: VfsResult<Arc<FileHandle>>| r.unwrap_err().kind();

        assert_eq!(kind(fs.open("/nope", OpenFlags::read()).await), ErrorKind::NotFound);
        assert_eq!(kind(fs.open("/lib", OpenFlags::read()).await), ErrorKind::IsADirectory);
        assert_eq!(kind(fs.open("/", OpenFlags::read()).await), ErrorKind::IsADirectory);
        assert_eq!(
            kind(fs.open("/a.txt", OpenFlags::create_exclusive()).await),
            ErrorKind::AlreadyExists
        );
        assert_eq!(kind(fs.open("/a.txt", OpenFlags::write()).await), ErrorKind::AlreadyExists);
        assert_eq!(fs.source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_writes_denied() {
        let fs = store();
        assert!(fs.is_read_only());
        assert_eq!(fs.create("/new").await.unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert_eq!(
            fs.write("/a.txt", 0, b"x").await.unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(fs.mkdir("/d").await.unwrap_err().kind(), ErrorKind::PermissionDenied);

        let handle = fs.open("/a.txt", OpenFlags::read_write()).await.unwrap();
        handle.write(0, b"J").unwrap();
        fs.flush("/a.txt", &handle).await.unwrap();
        assert!(handle.is_dirty());
    }

    #[tokio::test]
    async fn test_empty_releases_handles() {
        let fs = store();
        let first = fs.open("/a.txt", OpenFlags::read()).await.unwrap();
        assert_eq!(fs.empty(), 1);

        let second = fs.open("/a.txt", OpenFlags::read()).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(fs.source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(fs.stat("/a.txt").await.unwrap().size, 5);
    }

    #[tokio::test]
    async fn test_preload_skips_fetch() {
        let fs = store();
        fs.preload_file("/lib/lazy.js", b"preloaded".to_vec()).unwrap();

        let handle = fs.open("/lib/lazy.js", OpenFlags::read()).await.unwrap();
        assert_eq!(handle.contents(), b"preloaded");
        assert_eq!(fs.stat("/lib/lazy.js").await.unwrap().size, 9);
        assert_eq!(fs.source.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(fs.source.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sync_convention_needs_blocking_source() {
        assert!(!store().supports_synch());

        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let index = FileIndex::from_listing(&ListingNode::directory(
            "",
            vec![ListingNode::file("a.txt", None)],
        ))
        .unwrap();
        let fs = IndexedFileSystem::new(index, DirectorySource::new(dir.path()));

        let sync = fs.as_sync().unwrap();
        assert_eq!(sync.stat_sync("/a.txt").unwrap().size, 5);
        assert_eq!(sync.read_file_sync("/a.txt").unwrap(), b"hello");
        assert_eq!(fs.read_file("/a.txt").await.unwrap(), b"hello");
    }
}
