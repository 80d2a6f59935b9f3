//! Mount table with longest-prefix routing.
//!
//! Routes filesystem operations to the appropriate backend based on path.
//! The root `/` is always bound (to a [`MemoryBackend`] unless another root
//! is supplied), so every path routes somewhere.

use async_trait::async_trait;
use indexmap::IndexSet;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backends::MemoryBackend;
use crate::error::{ErrorKind, VfsError, VfsResult};
use crate::flags::OpenFlags;
use crate::handle::FileHandle;
use crate::ops::{FileSystem, SyncFileSystem};
use crate::path;
use crate::types::FileAttr;

/// Information about a mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// The mount path (e.g., "/mnt/project").
    pub path: String,
    /// Backend name.
    pub backend: String,
    /// Whether this mount is read-only.
    pub read_only: bool,
}

/// Where a path lands after routing.
struct Route {
    mount_point: String,
    backend: Arc<dyn FileSystem>,
    relative: String,
}

/// Routes filesystem operations to mounted backends.
///
/// Mount points are matched by longest segment-aligned prefix. If `/mnt` and
/// `/mnt/project` are both mounted, `/mnt/project/src/main.rs` is routed to
/// the `/mnt/project` mount, while `/mnt/projects` stays with `/mnt`.
pub struct MountTable {
    /// Backend bound at `/`.
    root: Arc<dyn FileSystem>,
    /// Mount points other than `/`, keyed by clean absolute path.
    mounts: RwLock<BTreeMap<String, Arc<dyn FileSystem>>>,
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTable")
            .field("mounts", &self.mount_points())
            .finish()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable {
    /// Create a table whose root is a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_root(Arc::new(MemoryBackend::new()))
    }

    /// Create a table with the given root backend.
    pub fn with_root(root: Arc<dyn FileSystem>) -> Self {
        Self {
            root,
            mounts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Mount a filesystem at the given path.
    pub async fn mount(&self, prefix: &str, fs: impl FileSystem + 'static) -> VfsResult<()> {
        self.mount_arc(prefix, Arc::new(fs)).await
    }

    /// Mount a filesystem (already wrapped in Arc) at the given path.
    ///
    /// The prefix must be a clean absolute path that is not already bound,
    /// and the owning backend must not hold a file or a non-empty directory
    /// there.
    pub async fn mount_arc(&self, prefix: &str, fs: Arc<dyn FileSystem>) -> VfsResult<()> {
        let owner = self.check_unbound(prefix)?;
        for dir in Self::ancestors(&owner.relative) {
            match owner.backend.stat(&dir).await {
                Ok(attr) if attr.is_file() => return Err(VfsError::not_a_directory(prefix)),
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        let occupied = match owner.backend.stat(&owner.relative).await {
            Ok(attr) if attr.is_file() => return Err(VfsError::not_a_directory(prefix)),
            Ok(_) => Some(owner.backend.readdir(&owner.relative).await?),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        self.bind(prefix, fs, occupied)
    }

    /// Mount using the synchronous convention of the owning backend.
    pub fn mount_sync(&self, prefix: &str, fs: Arc<dyn FileSystem>) -> VfsResult<()> {
        let owner = self.check_unbound(prefix)?;
        let sync = owner.backend.as_sync().ok_or_else(|| {
            VfsError::not_supported(format!(
                "{} at {} has no synchronous calls",
                owner.backend.name(),
                owner.mount_point
            ))
        })?;
        for dir in Self::ancestors(&owner.relative) {
            match sync.stat_sync(&dir) {
                Ok(attr) if attr.is_file() => return Err(VfsError::not_a_directory(prefix)),
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        let occupied = match sync.stat_sync(&owner.relative) {
            Ok(attr) if attr.is_file() => return Err(VfsError::not_a_directory(prefix)),
            Ok(_) => Some(sync.readdir_sync(&owner.relative)?),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        self.bind(prefix, fs, occupied)
    }

    fn check_unbound(&self, prefix: &str) -> VfsResult<Route> {
        path::check_mount_path(prefix)?;
        if prefix == "/" || self.mounts.read().contains_key(prefix) {
            return Err(VfsError::already_exists(format!(
                "{} is already a mount point",
                prefix
            )));
        }
        Ok(self.route(prefix))
    }

    /// Proper ancestors of `relative` below the backend root, nearest first.
    fn ancestors(relative: &str) -> Vec<String> {
        let mut dirs = Vec::new();
        let mut current = path::parent(relative);
        while let Some(dir) = current.filter(|d| d != "/") {
            current = path::parent(&dir);
            dirs.push(dir);
        }
        dirs
    }

    fn bind(
        &self,
        prefix: &str,
        fs: Arc<dyn FileSystem>,
        occupied: Option<Vec<String>>,
    ) -> VfsResult<()> {
        if occupied.is_some_and(|names| !names.is_empty()) {
            return Err(VfsError::not_supported(format!(
                "cannot mount over non-empty directory {}",
                prefix
            )));
        }

        let mut mounts = self.mounts.write();
        if mounts.contains_key(prefix) {
            return Err(VfsError::already_exists(format!(
                "{} is already a mount point",
                prefix
            )));
        }
        info!(mount_point = prefix, backend = fs.name(), "mounted");
        mounts.insert(prefix.to_string(), fs);
        Ok(())
    }

    /// Unmount the filesystem at the given path.
    pub fn unmount(&self, prefix: &str) -> VfsResult<()> {
        if prefix == "/" {
            return Err(VfsError::invalid_argument("the root cannot be unmounted"));
        }
        match self.mounts.write().remove(prefix) {
            Some(fs) => {
                info!(mount_point = prefix, backend = fs.name(), "unmounted");
                Ok(())
            }
            None => Err(VfsError::not_found(format!("{} is not a mount point", prefix))),
        }
    }

    /// Mount paths, `/` first and the rest in sorted order.
    pub fn mount_points(&self) -> Vec<String> {
        std::iter::once("/".to_string())
            .chain(self.mounts.read().keys().cloned())
            .collect()
    }

    /// List all current mounts.
    pub fn list_mounts(&self) -> Vec<MountInfo> {
        let describe = |path: &str, fs: &Arc<dyn FileSystem>| MountInfo {
            path: path.to_string(),
            backend: fs.name().to_string(),
            read_only: fs.is_read_only(),
        };
        let mounts = self.mounts.read();
        std::iter::once(describe("/", &self.root))
            .chain(mounts.iter().map(|(path, fs)| describe(path, fs)))
            .collect()
    }

    /// Find the backend owning `path` and the path relative to it.
    pub fn resolve(&self, path: &str) -> (Arc<dyn FileSystem>, String) {
        let route = self.route(path);
        (route.backend, route.relative)
    }

    fn route(&self, path: &str) -> Route {
        let normalized = path::normalize(path);
        let mounts = self.mounts.read();

        let mut route = Route {
            mount_point: "/".to_string(),
            backend: Arc::clone(&self.root),
            relative: normalized.clone(),
        };
        for (mount_point, fs) in mounts.iter() {
            if mount_point.len() <= route.mount_point.len() {
                continue;
            }
            if let Some(relative) = path::strip_mount_prefix(&normalized, mount_point) {
                route = Route {
                    mount_point: mount_point.clone(),
                    backend: Arc::clone(fs),
                    relative,
                };
            }
        }
        drop(mounts);

        debug!(
            path = %normalized,
            mount_point = %route.mount_point,
            relative = %route.relative,
            "routed"
        );
        route
    }

    /// First segment of every mount point strictly beneath `dir`.
    fn mounts_below(&self, dir: &str) -> Vec<String> {
        self.mounts
            .read()
            .keys()
            .filter(|mount_point| mount_point.as_str() != dir)
            .filter_map(|mount_point| path::strip_mount_prefix(mount_point, dir))
            .filter_map(|rest| path::segments(&rest).into_iter().next())
            .collect()
    }

    fn is_mount_point(&self, path: &str) -> bool {
        self.mounts.read().contains_key(path)
    }

    /// Combine a backend listing with the mount points beneath `dir`.
    fn merge_listing(&self, dir: &str, listed: VfsResult<Vec<String>>) -> VfsResult<Vec<String>> {
        let below = self.mounts_below(dir);
        let listed = match listed {
            Ok(names) => names,
            Err(e) if e.kind() == ErrorKind::NotFound && !below.is_empty() => Vec::new(),
            Err(e) => return Err(e),
        };
        let merged: IndexSet<String> = listed.into_iter().chain(below).collect();
        Ok(merged.into_iter().collect())
    }

    /// Intermediate directories of nested mounts stat as directories.
    fn intermediate_attr(&self, dir: &str, stat: VfsResult<FileAttr>) -> VfsResult<FileAttr> {
        match stat {
            Err(e) if e.kind() == ErrorKind::NotFound && !self.mounts_below(dir).is_empty() => {
                Ok(FileAttr::directory(0o755))
            }
            other => other,
        }
    }

    fn writable(route: &Route, path: &str) -> VfsResult<()> {
        if route.backend.is_read_only() {
            Err(VfsError::read_only(path::normalize(path)))
        } else {
            Ok(())
        }
    }

    fn sync_of(route: &Route) -> VfsResult<&dyn SyncFileSystem> {
        route.backend.as_sync().ok_or_else(|| {
            VfsError::not_supported(format!(
                "{} at {} has no synchronous calls",
                route.backend.name(),
                route.mount_point
            ))
        })
    }

    /// Routes for both ends of a rename, rejecting mount points.
    fn rename_routes(&self, from: &str, to: &str) -> VfsResult<(Route, Route)> {
        for end in [from, to] {
            if self.is_mount_point(&path::normalize(end)) {
                return Err(VfsError::invalid_argument(format!(
                    "cannot rename mount point {}",
                    path::normalize(end)
                )));
            }
        }
        let source = self.route(from);
        let target = self.route(to);
        Self::writable(&source, from)?;
        Self::writable(&target, to)?;
        Ok((source, target))
    }
}

#[async_trait]
impl FileSystem for MountTable {
    fn name(&self) -> &str {
        "Mountable"
    }

    fn is_read_only(&self) -> bool {
        // Individual mounts might be
        false
    }

    fn as_sync(&self) -> Option<&dyn SyncFileSystem> {
        let all_sync = self.root.supports_synch()
            && self.mounts.read().values().all(|fs| fs.supports_synch());
        if all_sync {
            Some(self)
        } else {
            None
        }
    }

    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let route = self.route(path);
        let stat = route.backend.stat(&route.relative).await;
        self.intermediate_attr(&path::normalize(path), stat)
    }

    async fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Arc<FileHandle>> {
        let route = self.route(path);
        route.backend.open(&route.relative, flags).await
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<String>> {
        let route = self.route(path);
        let listed = route.backend.readdir(&route.relative).await;
        self.merge_listing(&path::normalize(path), listed)
    }

    async fn create(&self, path: &str) -> VfsResult<FileAttr> {
        let route = self.route(path);
        Self::writable(&route, path)?;
        route.backend.create(&route.relative).await
    }

    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let route = self.route(path);
        Self::writable(&route, path)?;
        route.backend.write(&route.relative, offset, data).await
    }

    async fn truncate(&self, path: &str, len: u64) -> VfsResult<()> {
        let route = self.route(path);
        Self::writable(&route, path)?;
        route.backend.truncate(&route.relative, len).await
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        let route = self.route(path);
        Self::writable(&route, path)?;
        route.backend.unlink(&route.relative).await
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let (source, target) = self.rename_routes(from, to)?;
        if source.mount_point == target.mount_point {
            return source.backend.rename(&source.relative, &target.relative).await;
        }

        // Across mounts: copy the bytes, then drop the source
        if source.backend.stat(&source.relative).await?.is_dir() {
            return Err(VfsError::not_supported(format!(
                "cannot move directory {} across mounts",
                path::normalize(from)
            )));
        }
        let data = source.backend.read_file(&source.relative).await?;
        target.backend.write_file(&target.relative, &data).await?;
        source.backend.unlink(&source.relative).await?;
        debug!(from, to, bytes = data.len(), "moved file across mounts");
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        let route = self.route(path);
        Self::writable(&route, path)?;
        route.backend.mkdir(&route.relative).await
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let route = self.route(path);
        Self::writable(&route, path)?;
        route.backend.rmdir(&route.relative).await
    }

    async fn flush(&self, path: &str, handle: &FileHandle) -> VfsResult<()> {
        let route = self.route(path);
        route.backend.flush(&route.relative, handle).await
    }
}

impl SyncFileSystem for MountTable {
    fn stat_sync(&self, path: &str) -> VfsResult<FileAttr> {
        let route = self.route(path);
        let stat = Self::sync_of(&route)?.stat_sync(&route.relative);
        self.intermediate_attr(&path::normalize(path), stat)
    }

    fn open_sync(&self, path: &str, flags: OpenFlags) -> VfsResult<Arc<FileHandle>> {
        let route = self.route(path);
        Self::sync_of(&route)?.open_sync(&route.relative, flags)
    }

    fn readdir_sync(&self, path: &str) -> VfsResult<Vec<String>> {
        let route = self.route(path);
        let listed = Self::sync_of(&route)?.readdir_sync(&route.relative);
        self.merge_listing(&path::normalize(path), listed)
    }

    fn create_sync(&self, path: &str) -> VfsResult<FileAttr> {
        let route = self.route(path);
        Self::writable(&route, path)?;
        Self::sync_of(&route)?.create_sync(&route.relative)
    }

    fn write_sync(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let route = self.route(path);
        Self::writable(&route, path)?;
        Self::sync_of(&route)?.write_sync(&route.relative, offset, data)
    }

    fn truncate_sync(&self, path: &str, len: u64) -> VfsResult<()> {
        let route = self.route(path);
        Self::writable(&route, path)?;
        Self::sync_of(&route)?.truncate_sync(&route.relative, len)
    }

    fn unlink_sync(&self, path: &str) -> VfsResult<()> {
        let route = self.route(path);
        Self::writable(&route, path)?;
        Self::sync_of(&route)?.unlink_sync(&route.relative)
    }

    fn rename_sync(&self, from: &str, to: &str) -> VfsResult<()> {
        let (source, target) = self.rename_routes(from, to)?;
        let source_sync = Self::sync_of(&source)?;
        if source.mount_point == target.mount_point {
            return source_sync.rename_sync(&source.relative, &target.relative);
        }

        let target_sync = Self::sync_of(&target)?;
        if source_sync.stat_sync(&source.relative)?.is_dir() {
            return Err(VfsError::not_supported(format!(
                "cannot move directory {} across mounts",
                path::normalize(from)
            )));
        }
        let data = source_sync.read_file_sync(&source.relative)?;
        target_sync.write_file_sync(&target.relative, &data)?;
        source_sync.unlink_sync(&source.relative)
    }

    fn mkdir_sync(&self, path: &str) -> VfsResult<()> {
        let route = self.route(path);
        Self::writable(&route, path)?;
        Self::sync_of(&route)?.mkdir_sync(&route.relative)
    }

    fn rmdir_sync(&self, path: &str) -> VfsResult<()> {
        let route = self.route(path);
        Self::writable(&route, path)?;
        Self::sync_of(&route)?.rmdir_sync(&route.relative)
    }

    fn flush_sync(&self, path: &str, handle: &FileHandle) -> VfsResult<()> {
        let route = self.route(path);
        Self::sync_of(&route)?.flush_sync(&route.relative, handle)
    }
}
