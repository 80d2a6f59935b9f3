//! Backend capability contract.
//!
//! Every store implements [`FileSystem`], the asynchronous calling
//! convention. Stores that can also answer without suspending implement
//! [`SyncFileSystem`] and advertise it through [`FileSystem::as_sync`].
//! Composing components (the mount table, the async mirror) consult these
//! capability checks before delegating a write or a synchronous call.
//!
//! Paths are `/`-separated and relative to the backend's own root. The
//! MountTable handles routing and path translation.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::VfsResult;
use crate::flags::OpenFlags;
use crate::handle::FileHandle;
use crate::types::FileAttr;

/// Core VFS operations, asynchronous convention.
#[async_trait]
pub trait FileSystem: Send + Sync {
    // ========================================================================
    // Identity
    // ========================================================================

    /// Short backend name for logs and mount listings.
    fn name(&self) -> &str;

    /// Returns true if this filesystem rejects every write.
    fn is_read_only(&self) -> bool;

    /// Returns true if the store understands links.
    fn supports_links(&self) -> bool {
        false
    }

    /// Returns true if the store can change file properties (mode, times).
    fn supports_props(&self) -> bool {
        false
    }

    /// The synchronous convention, if this store offers one.
    fn as_sync(&self) -> Option<&dyn SyncFileSystem> {
        None
    }

    /// Returns true if [`FileSystem::as_sync`] is available.
    fn supports_synch(&self) -> bool {
        self.as_sync().is_some()
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file attributes.
    async fn stat(&self, path: &str) -> VfsResult<FileAttr>;

    /// Open a file, resolving existence through [`OpenFlags::resolve`].
    async fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Arc<FileHandle>>;

    /// Names of the entries in a directory (never `.` or `..`).
    async fn readdir(&self, path: &str) -> VfsResult<Vec<String>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Create a new empty file. Fails if anything exists at `path`.
    async fn create(&self, path: &str) -> VfsResult<FileAttr>;

    /// Write `data` at `offset`, returning the number of bytes written.
    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<usize>;

    /// Truncate or extend a file to `len` bytes.
    async fn truncate(&self, path: &str, len: u64) -> VfsResult<()>;

    /// Remove a file.
    async fn unlink(&self, path: &str) -> VfsResult<()>;

    /// Rename a file or directory.
    async fn rename(&self, from: &str, to: &str) -> VfsResult<()>;

    /// Create a directory. The parent must exist.
    async fn mkdir(&self, path: &str) -> VfsResult<()>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &str) -> VfsResult<()>;

    /// Persist a dirty handle opened at `path`.
    async fn flush(&self, path: &str, handle: &FileHandle) -> VfsResult<()> {
        if !handle.is_dirty() {
            return Ok(());
        }
        self.write_file(path, &handle.contents()).await?;
        handle.mark_clean();
        Ok(())
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &str) -> bool {
        self.stat(path).await.is_ok()
    }

    /// Read entire file contents.
    async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let handle = self.open(path, OpenFlags::read()).await?;
        Ok(handle.contents())
    }

    /// Write entire file contents, creating or truncating as needed.
    async fn write_file(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        if self.exists(path).await {
            self.truncate(path, 0).await?;
        } else {
            self.create(path).await?;
        }
        if !data.is_empty() {
            self.write(path, 0, data).await?;
        }
        Ok(())
    }
}

/// Core VFS operations, synchronous convention.
///
/// Each call completes before returning. Method names carry a `_sync`
/// suffix so both conventions can be in scope on one type.
pub trait SyncFileSystem: Send + Sync {
    /// Get file attributes.
    fn stat_sync(&self, path: &str) -> VfsResult<FileAttr>;

    /// Open a file, resolving existence through [`OpenFlags::resolve`].
    fn open_sync(&self, path: &str, flags: OpenFlags) -> VfsResult<Arc<FileHandle>>;

    /// Names of the entries in a directory.
    fn readdir_sync(&self, path: &str) -> VfsResult<Vec<String>>;

    /// Create a new empty file.
    fn create_sync(&self, path: &str) -> VfsResult<FileAttr>;

    /// Write `data` at `offset`.
    fn write_sync(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<usize>;

    /// Truncate or extend a file.
    fn truncate_sync(&self, path: &str, len: u64) -> VfsResult<()>;

    /// Remove a file.
    fn unlink_sync(&self, path: &str) -> VfsResult<()>;

    /// Rename a file or directory.
    fn rename_sync(&self, from: &str, to: &str) -> VfsResult<()>;

    /// Create a directory.
    fn mkdir_sync(&self, path: &str) -> VfsResult<()>;

    /// Remove an empty directory.
    fn rmdir_sync(&self, path: &str) -> VfsResult<()>;

    /// Persist a dirty handle opened at `path`.
    fn flush_sync(&self, path: &str, handle: &FileHandle) -> VfsResult<()> {
        if !handle.is_dirty() {
            return Ok(());
        }
        self.write_file_sync(path, &handle.contents())?;
        handle.mark_clean();
        Ok(())
    }

    /// Check if a path exists.
    fn exists_sync(&self, path: &str) -> bool {
        self.stat_sync(path).is_ok()
    }

    /// Read entire file contents.
    fn read_file_sync(&self, path: &str) -> VfsResult<Vec<u8>> {
        let handle = self.open_sync(path, OpenFlags::read())?;
        Ok(handle.contents())
    }

    /// Write entire file contents, creating or truncating as needed.
    fn write_file_sync(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        if self.exists_sync(path) {
            self.truncate_sync(path, 0)?;
        } else {
            self.create_sync(path)?;
        }
        if !data.is_empty() {
            self.write_sync(path, 0, data)?;
        }
        Ok(())
    }
}
