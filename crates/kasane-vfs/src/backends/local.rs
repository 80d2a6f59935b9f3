//! Host directory backend.
//!
//! Provides access to a real directory tree, with path security
//! to prevent escaping the root directory. Only the asynchronous
//! convention is offered, which makes this the usual slow half of an
//! [`AsyncMirror`](crate::AsyncMirror).

use async_trait::async_trait;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::error::{VfsError, VfsResult};
use crate::flags::{OpenAction, OpenFlags};
use crate::handle::FileHandle;
use crate::ops::FileSystem;
use crate::path;
use crate::types::{FileAttr, FileType};

/// Host directory backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/site`, then `read_file("/css/main.css")` reads
/// `/srv/site/css/main.css`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    read_only: bool,
}

impl LocalBackend {
    /// Create a writable backend rooted at the given directory.
    ///
    /// The root is canonicalized at construction time so that the escape
    /// check compares like with like (e.g. `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            read_only: false,
        }
    }

    /// Create a read-only backend.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(root)
        }
    }

    /// Set whether this backend is read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a VFS path onto the host, rejecting symlinks that lead outside
    /// the root.
    async fn resolve(&self, vfs_path: &str) -> VfsResult<PathBuf> {
        let normalized = path::normalize(vfs_path);
        let mut full = self.root.clone();
        for segment in path::segments(&normalized) {
            full.push(segment);
        }

        // The target may not exist yet; check the nearest existing ancestor
        let mut probe = full.as_path();
        while fs::symlink_metadata(probe).await.is_err() {
            if probe == self.root {
                return Ok(full);
            }
            match probe.parent() {
                Some(parent) => probe = parent,
                None => return Ok(full),
            }
        }
        let canonical = dunce::canonicalize(probe).map_err(|e| VfsError::host(&normalized, e))?;
        if !canonical.starts_with(&self.root) {
            return Err(VfsError::permission_denied(format!(
                "path escapes root: {}",
                normalized
            )));
        }
        Ok(full)
    }

    fn check_writable(&self, vfs_path: &str) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::read_only(path::normalize(vfs_path)))
        } else {
            Ok(())
        }
    }

    /// The parent of `full` must be an existing directory.
    async fn check_parent(full: &Path, vfs_path: &str) -> VfsResult<()> {
        let parent_vfs = path::parent(vfs_path).unwrap_or_else(|| "/".to_string());
        let Some(parent) = full.parent() else {
            return Ok(());
        };
        match fs::metadata(parent).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(VfsError::not_a_directory(parent_vfs)),
            Err(_) => Err(VfsError::not_found(parent_vfs)),
        }
    }

    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        let kind = if meta.is_dir() {
            FileType::Directory
        } else {
            FileType::File
        };

        FileAttr {
            size: meta.len(),
            kind,
            perm: meta.permissions().mode() & 0o7777,
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            ino: meta.ino(),
        }
    }

    /// Stat a resolved host path, reporting errors against the VFS path.
    async fn host_stat(full: &Path, vfs_path: &str) -> VfsResult<Option<std::fs::Metadata>> {
        match fs::metadata(full).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VfsError::io(format!("{}: {}", path::normalize(vfs_path), e))),
        }
    }
}

#[async_trait]
impl FileSystem for LocalBackend {
    fn name(&self) -> &str {
        "LocalDirectory"
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let full = self.resolve(path).await?;
        match Self::host_stat(&full, path).await? {
            Some(meta) => Ok(Self::metadata_to_attr(&meta)),
            None => Err(VfsError::not_found(path::normalize(path))),
        }
    }

    async fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Arc<FileHandle>> {
        let normalized = path::normalize(path);
        let full = self.resolve(&normalized).await?;
        let existing = Self::host_stat(&full, &normalized).await?;

        if existing.as_ref().is_some_and(|m| m.is_dir()) {
            return Err(VfsError::is_a_directory(normalized));
        }
        let action = flags.resolve(existing.is_some()).into_result(&normalized)?;
        match action {
            OpenAction::CreateFile => {
                self.create(&normalized).await?;
            }
            OpenAction::Truncate => {
                self.truncate(&normalized, 0).await?;
            }
            _ => {}
        }

        let data = fs::read(&full).await.map_err(|e| VfsError::host(&normalized, e))?;
        let meta = fs::metadata(&full).await.map_err(|e| VfsError::host(&normalized, e))?;
        Ok(Arc::new(FileHandle::new(
            normalized,
            flags,
            Self::metadata_to_attr(&meta),
            data,
        )))
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<String>> {
        let normalized = path::normalize(path);
        let full = self.resolve(&normalized).await?;
        match Self::host_stat(&full, &normalized).await? {
            Some(meta) if meta.is_dir() => {}
            Some(_) => return Err(VfsError::not_a_directory(normalized)),
            None => return Err(VfsError::not_found(normalized)),
        }

        let mut names = Vec::new();
        let mut dir = fs::read_dir(&full).await.map_err(|e| VfsError::host(&normalized, e))?;
        while let Some(entry) = dir.next_entry().await.map_err(|e| VfsError::host(&normalized, e))? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }

        names.sort();
        Ok(names)
    }

    async fn create(&self, path: &str) -> VfsResult<FileAttr> {
        self.check_writable(path)?;
        let normalized = path::normalize(path);
        let full = self.resolve(&normalized).await?;
        if Self::host_stat(&full, &normalized).await?.is_some() {
            return Err(VfsError::already_exists(normalized));
        }
        Self::check_parent(&full, &normalized).await?;

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
            .map_err(|e| VfsError::host(&normalized, e))?;
        let meta = file.metadata().await.map_err(|e| VfsError::host(&normalized, e))?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<usize> {
        self.check_writable(path)?;
        let normalized = path::normalize(path);
        let full = self.resolve(&normalized).await?;
        match Self::host_stat(&full, &normalized).await? {
            Some(meta) if meta.is_dir() => return Err(VfsError::is_a_directory(normalized)),
            Some(_) => {}
            None => return Err(VfsError::not_found(normalized)),
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&full)
            .await
            .map_err(|e| VfsError::host(&normalized, e))?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| VfsError::host(&normalized, e))?;
        file.write_all(data).await.map_err(|e| VfsError::host(&normalized, e))?;
        file.flush().await.map_err(|e| VfsError::host(&normalized, e))?;

        Ok(data.len())
    }

    async fn truncate(&self, path: &str, len: u64) -> VfsResult<()> {
        self.check_writable(path)?;
        let normalized = path::normalize(path);
        let full = self.resolve(&normalized).await?;
        match Self::host_stat(&full, &normalized).await? {
            Some(meta) if meta.is_dir() => return Err(VfsError::is_a_directory(normalized)),
            Some(_) => {}
            None => return Err(VfsError::not_found(normalized)),
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .open(&full)
            .await
            .map_err(|e| VfsError::host(&normalized, e))?;
        file.set_len(len).await.map_err(|e| VfsError::host(&normalized, e))
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        self.check_writable(path)?;
        let normalized = path::normalize(path);
        let full = self.resolve(&normalized).await?;
        match Self::host_stat(&full, &normalized).await? {
            Some(meta) if meta.is_dir() => Err(VfsError::is_a_directory(normalized)),
            Some(_) => fs::remove_file(&full).await.map_err(|e| VfsError::host(&normalized, e)),
            None => Err(VfsError::not_found(normalized)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.check_writable(from)?;
        let from_norm = path::normalize(from);
        let to_norm = path::normalize(to);
        if from_norm == "/" || to_norm == "/" {
            return Err(VfsError::permission_denied("cannot rename the root"));
        }
        if to_norm.starts_with(&format!("{}/", from_norm)) {
            return Err(VfsError::invalid_argument(format!(
                "cannot move {} into itself",
                from_norm
            )));
        }

        let from_path = self.resolve(&from_norm).await?;
        let to_path = self.resolve(&to_norm).await?;
        if Self::host_stat(&from_path, &from_norm).await?.is_none() {
            return Err(VfsError::not_found(from_norm));
        }
        Self::check_parent(&to_path, &to_norm).await?;

        fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| VfsError::host(&from_norm, e))
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.check_writable(path)?;
        let normalized = path::normalize(path);
        let full = self.resolve(&normalized).await?;
        if Self::host_stat(&full, &normalized).await?.is_some() {
            return Err(VfsError::already_exists(normalized));
        }
        Self::check_parent(&full, &normalized).await?;

        fs::create_dir(&full).await.map_err(|e| VfsError::host(&normalized, e))
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        self.check_writable(path)?;
        let normalized = path::normalize(path);
        if normalized == "/" {
            return Err(VfsError::permission_denied("cannot remove root"));
        }
        let full = self.resolve(&normalized).await?;
        match Self::host_stat(&full, &normalized).await? {
            Some(meta) if meta.is_dir() => {}
            Some(_) => return Err(VfsError::not_a_directory(normalized)),
            None => return Err(VfsError::not_found(normalized)),
        }

        let mut entries = fs::read_dir(&full).await.map_err(|e| VfsError::host(&normalized, e))?;
        if entries.next_entry().await.map_err(|e| VfsError::host(&normalized, e))?.is_some() {
            return Err(VfsError::not_empty(normalized));
        }
        fs::remove_dir(&full).await.map_err(|e| VfsError::host(&normalized, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use tempfile::TempDir;

    fn setup() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        (backend, dir)
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let (backend, dir) = setup();

        backend.create("test.txt").await.unwrap();
        backend.write("test.txt", 0, b"hello world").await.unwrap();

        assert_eq!(backend.read_file("/test.txt").await.unwrap(), b"hello world");
        assert_eq!(
            std::fs::read(dir.path().join("test.txt")).unwrap(),
            b"hello world"
        );
    }

    #[tokio::test]
    async fn test_write_at_offset() {
        let (backend, _dir) = setup();

        backend.write_file("test.txt", b"hello world").await.unwrap();
        backend.write("test.txt", 6, b"there").await.unwrap();

        assert_eq!(backend.read_file("test.txt").await.unwrap(), b"hello there");
    }

    #[tokio::test]
    async fn test_mkdir_and_readdir() {
        let (backend, _dir) = setup();

        backend.mkdir("subdir").await.unwrap();
        backend.create("subdir/file.txt").await.unwrap();
        backend.create("root.txt").await.unwrap();

        assert_eq!(backend.readdir("/").await.unwrap(), vec!["root.txt", "subdir"]);
        assert!(backend.stat("subdir").await.unwrap().is_dir());
        assert_eq!(
            backend.readdir("root.txt").await.unwrap_err().kind(),
            ErrorKind::NotADirectory
        );
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let (backend, _dir) = setup();

        let err = backend.create("missing/file.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        backend.create("file.txt").await.unwrap();
        let err = backend.create("file.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_read_only() {
        let (mut backend, _dir) = setup();
        backend.set_read_only(true);
        assert!(backend.is_read_only());

        let err = backend.create("test.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_dot_dot_stays_inside_root() {
        let (backend, dir) = setup();

        let err = backend.read_file("../../../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        backend.write_file("../../escaped.txt", b"kept").await.unwrap();
        assert_eq!(backend.root(), dunce::canonicalize(dir.path()).unwrap());
        assert!(backend.root().join("escaped.txt").exists());
    }

    #[tokio::test]
    async fn test_host_errors_name_vfs_path() {
        let (backend, dir) = setup();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/f"), b"x").unwrap();

        // rename onto a non-empty directory fails inside the host call
        std::fs::create_dir(dir.path().join("full")).unwrap();
        std::fs::write(dir.path().join("full/g"), b"y").unwrap();
        let err = backend.rename("/sub", "/full").await.unwrap_err();
        assert!(err.to_string().contains("/sub"), "{err}");
    }

    #[tokio::test]
    async fn test_symlink_escape_blocked() {
        let (backend, dir) = setup();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), b"nope").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let err = backend.read_file("escape/secret").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_rename() {
        let (backend, _dir) = setup();

        backend.write_file("old.txt", b"content").await.unwrap();
        backend.rename("old.txt", "new.txt").await.unwrap();

        assert!(!backend.exists("old.txt").await);
        assert_eq!(backend.read_file("new.txt").await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_truncate() {
        let (backend, _dir) = setup();

        backend.write_file("test.txt", b"hello world").await.unwrap();
        backend.truncate("test.txt", 5).await.unwrap();

        assert_eq!(backend.read_file("test.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_rmdir_and_unlink() {
        let (backend, _dir) = setup();

        backend.mkdir("d").await.unwrap();
        backend.create("d/f").await.unwrap();
        assert_eq!(backend.rmdir("d").await.unwrap_err().kind(), ErrorKind::NotEmpty);
        assert_eq!(backend.unlink("d").await.unwrap_err().kind(), ErrorKind::IsADirectory);

        backend.unlink("d/f").await.unwrap();
        backend.rmdir("d").await.unwrap();
        assert!(!backend.exists("d").await);
    }

    #[tokio::test]
    async fn test_open_flags() {
        let (backend, _dir) = setup();

        let err = backend.open("nope", OpenFlags::read()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        backend.open("made", OpenFlags::create()).await.unwrap();
        assert!(backend.exists("made").await);

        backend.write_file("made", b"data").await.unwrap();
        let handle = backend.open("made", OpenFlags::read()).await.unwrap();
        assert_eq!(handle.contents(), b"data");

        let handle = backend.open("made", OpenFlags::create_truncate()).await.unwrap();
        assert_eq!(handle.size(), 0);
        assert_eq!(backend.stat("made").await.unwrap().size, 0);
    }
}
