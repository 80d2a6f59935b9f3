//! In-memory filesystem backend.
//!
//! Used as the default root of a mount table, as the fast half of an
//! [`AsyncMirror`](crate::AsyncMirror), and in tests. All data is ephemeral.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{VfsError, VfsResult};
use crate::flags::{OpenAction, OpenFlags};
use crate::handle::{self, FileHandle};
use crate::ops::{FileSystem, SyncFileSystem};
use crate::path;
use crate::types::FileAttr;

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
}

impl Entry {
    fn attr(&self) -> &FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self, Entry::Directory { .. })
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via internal `RwLock`. Entries are keyed by normalized path.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(
            "/".to_string(),
            Entry::Directory {
                attr: FileAttr::directory(0o755),
            },
        );
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Number of files and directories, excluding the root.
    pub fn len(&self) -> usize {
        self.entries.read().len() - 1
    }

    /// Returns true if only the root directory exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The parent of `path` must exist and be a directory.
    fn check_parent(entries: &HashMap<String, Entry>, path: &str) -> VfsResult<()> {
        let Some(parent) = path::parent(path) else {
            return Err(VfsError::invalid_argument("the root has no parent"));
        };
        match entries.get(&parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(VfsError::not_a_directory(parent)),
            None => Err(VfsError::not_found(parent)),
        }
    }

    fn has_children(entries: &HashMap<String, Entry>, dir: &str) -> bool {
        entries
            .keys()
            .any(|k| k != dir && path::parent(k).as_deref() == Some(dir))
    }
}

impl SyncFileSystem for MemoryBackend {
    fn stat_sync(&self, path: &str) -> VfsResult<FileAttr> {
        let normalized = path::normalize(path);
        self.entries
            .read()
            .get(&normalized)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(normalized))
    }

    fn open_sync(&self, path: &str, flags: OpenFlags) -> VfsResult<Arc<FileHandle>> {
        let normalized = path::normalize(path);
        let mut entries = self.entries.write();

        match entries.get_mut(&normalized) {
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            Some(Entry::File { data, attr }) => {
                if flags.resolve(true).into_result(&normalized)? == OpenAction::Truncate {
                    data.clear();
                    attr.size = 0;
                    attr.mtime = SystemTime::now();
                }
                Ok(Arc::new(FileHandle::new(
                    normalized.clone(),
                    flags,
                    attr.clone(),
                    data.clone(),
                )))
            }
            None => {
                flags.resolve(false).into_result(&normalized)?;
                Self::check_parent(&entries, &normalized)?;
                let attr = FileAttr::file(0, 0o644);
                entries.insert(
                    normalized.clone(),
                    Entry::File {
                        data: Vec::new(),
                        attr: attr.clone(),
                    },
                );
                Ok(Arc::new(FileHandle::new(normalized, flags, attr, Vec::new())))
            }
        }
    }

    fn readdir_sync(&self, path: &str) -> VfsResult<Vec<String>> {
        let normalized = path::normalize(path);
        let entries = self.entries.read();

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(normalized)),
            None => return Err(VfsError::not_found(normalized)),
        }

        let mut names: Vec<String> = entries
            .keys()
            .filter(|k| **k != normalized && path::parent(k).as_deref() == Some(normalized.as_str()))
            .filter_map(|k| path::file_name(k))
            .collect();

        // Sort for consistent ordering
        names.sort();
        Ok(names)
    }

    fn create_sync(&self, path: &str) -> VfsResult<FileAttr> {
        let normalized = path::normalize(path);
        let mut entries = self.entries.write();

        if entries.contains_key(&normalized) {
            return Err(VfsError::already_exists(normalized));
        }
        Self::check_parent(&entries, &normalized)?;

        let attr = FileAttr::file(0, 0o644);
        entries.insert(
            normalized,
            Entry::File {
                data: Vec::new(),
                attr: attr.clone(),
            },
        );
        Ok(attr)
    }

    fn write_sync(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let normalized = path::normalize(path);
        let mut entries = self.entries.write();

        match entries.get_mut(&normalized) {
            Some(Entry::File {
                data: file_data,
                attr,
            }) => {
                let range = handle::buffer_range(&normalized, offset, data.len())?;
                // Extend if necessary
                if range.end > file_data.len() {
                    file_data.resize(range.end, 0);
                }
                file_data[range].copy_from_slice(data);
                attr.size = file_data.len() as u64;
                attr.mtime = SystemTime::now();
                Ok(data.len())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            None => Err(VfsError::not_found(normalized)),
        }
    }

    fn truncate_sync(&self, path: &str, len: u64) -> VfsResult<()> {
        let normalized = path::normalize(path);
        let mut entries = self.entries.write();

        match entries.get_mut(&normalized) {
            Some(Entry::File { data, attr }) => {
                data.resize(handle::buffer_len(&normalized, len)?, 0);
                attr.size = len;
                attr.mtime = SystemTime::now();
                Ok(())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            None => Err(VfsError::not_found(normalized)),
        }
    }

    fn unlink_sync(&self, path: &str) -> VfsResult<()> {
        let normalized = path::normalize(path);
        let mut entries = self.entries.write();

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            Some(Entry::File { .. }) => {
                entries.remove(&normalized);
                Ok(())
            }
            None => Err(VfsError::not_found(normalized)),
        }
    }

    fn rename_sync(&self, from: &str, to: &str) -> VfsResult<()> {
        let from = path::normalize(from);
        let to = path::normalize(to);

        if from == "/" || to == "/" {
            return Err(VfsError::permission_denied("cannot rename the root"));
        }
        if from == to {
            return Ok(());
        }

        let mut entries = self.entries.write();

        let source_is_dir = match entries.get(&from) {
            Some(entry) => entry.is_dir(),
            None => return Err(VfsError::not_found(from)),
        };
        if source_is_dir && to.starts_with(&format!("{}/", from)) {
            return Err(VfsError::invalid_argument(format!(
                "cannot move {} into itself",
                from
            )));
        }
        Self::check_parent(&entries, &to)?;

        match entries.get(&to) {
            Some(Entry::Directory { .. }) if !source_is_dir => {
                return Err(VfsError::is_a_directory(to));
            }
            Some(Entry::File { .. }) if source_is_dir => {
                return Err(VfsError::not_a_directory(to));
            }
            Some(Entry::Directory { .. }) if Self::has_children(&entries, &to) => {
                return Err(VfsError::not_empty(to));
            }
            _ => {}
        }

        let Some(entry) = entries.remove(&from) else {
            return Err(VfsError::not_found(from));
        };

        // Directories carry their whole subtree along
        if source_is_dir {
            let prefix = format!("{}/", from);
            let children: Vec<String> = entries
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();

            for child in children {
                if let Some(child_entry) = entries.remove(&child) {
                    let new_path = format!("{}{}", to, &child[from.len()..]);
                    entries.insert(new_path, child_entry);
                }
            }
        }

        // Insert at new location (possibly overwriting)
        entries.insert(to, entry);
        Ok(())
    }

    fn mkdir_sync(&self, path: &str) -> VfsResult<()> {
        let normalized = path::normalize(path);
        let mut entries = self.entries.write();

        if entries.contains_key(&normalized) {
            return Err(VfsError::already_exists(normalized));
        }
        Self::check_parent(&entries, &normalized)?;

        entries.insert(
            normalized,
            Entry::Directory {
                attr: FileAttr::directory(0o755),
            },
        );
        Ok(())
    }

    fn rmdir_sync(&self, path: &str) -> VfsResult<()> {
        let normalized = path::normalize(path);

        if normalized == "/" {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let mut entries = self.entries.write();

        // Check if it's a directory
        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(normalized)),
            None => return Err(VfsError::not_found(normalized)),
        }

        if Self::has_children(&entries, &normalized) {
            return Err(VfsError::not_empty(normalized));
        }

        entries.remove(&normalized);
        Ok(())
    }
}

#[async_trait]
impl FileSystem for MemoryBackend {
    fn name(&self) -> &str {
        "InMemory"
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn as_sync(&self) -> Option<&dyn SyncFileSystem> {
        Some(self)
    }

    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        self.stat_sync(path)
    }

    async fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Arc<FileHandle>> {
        self.open_sync(path, flags)
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<String>> {
        self.readdir_sync(path)
    }

    async fn create(&self, path: &str) -> VfsResult<FileAttr> {
        self.create_sync(path)
    }

    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<usize> {
        self.write_sync(path, offset, data)
    }

    async fn truncate(&self, path: &str, len: u64) -> VfsResult<()> {
        self.truncate_sync(path, len)
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        self.unlink_sync(path)
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.rename_sync(from, to)
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.mkdir_sync(path)
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        self.rmdir_sync(path)
    }

    async fn flush(&self, path: &str, handle: &FileHandle) -> VfsResult<()> {
        self.flush_sync(path, handle)
    }
}
