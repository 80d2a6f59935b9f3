//! Path-indexed inode tree built from a listing description.
//!
//! A [`FileIndex`] is built once from a [`ListingNode`] tree (usually a JSON
//! file generated next to the content it describes) and never changes shape
//! afterwards. File inodes may gain or lose a cached content handle, and
//! learn their size lazily when the listing did not carry one.
//!
//! Listing format:
//!
//! ```json
//! {"type": "directory", "name": "", "children": [
//!     {"type": "file", "name": "a.txt", "size": 5},
//!     {"type": "directory", "name": "docs", "children": []}
//! ]}
//! ```
//!
//! A missing `size` (or the legacy `-1`) means the size is unknown until
//! probed against the backing store.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{VfsError, VfsResult};
use crate::flags::OpenFlags;
use crate::handle::FileHandle;
use crate::path;
use crate::types::{next_ino, FileAttr, FileType};

/// Wire-level sentinel for "size unknown".
pub const UNKNOWN_SIZE: i64 = -1;

/// Node type in a listing description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingKind {
    File,
    Directory,
}

/// One node of a listing description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ListingKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ListingNode>>,
}

impl ListingNode {
    /// A directory node.
    pub fn directory(name: impl Into<String>, children: Vec<ListingNode>) -> Self {
        Self {
            name: name.into(),
            kind: ListingKind::Directory,
            size: None,
            children: Some(children),
        }
    }

    /// A file node; `None` leaves the size to be probed.
    pub fn file(name: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            kind: ListingKind::File,
            size: size.map(|s| s as i64),
            children: None,
        }
    }
}

/// A file in the index.
#[derive(Debug)]
pub struct FileInode {
    size: Option<u64>,
    mtime: SystemTime,
    ino: u64,
    handle: Option<Arc<FileHandle>>,
}

impl FileInode {
    fn new(size: Option<u64>) -> Self {
        Self {
            size,
            mtime: SystemTime::now(),
            ino: next_ino(),
            handle: None,
        }
    }

    /// Size in bytes, if known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// The attached content handle, if any.
    pub fn handle(&self) -> Option<&Arc<FileHandle>> {
        self.handle.as_ref()
    }

    /// Attributes; an unknown size reads as zero.
    pub fn attr(&self) -> FileAttr {
        FileAttr {
            size: self.size.unwrap_or(0),
            kind: FileType::File,
            perm: 0o444,
            mtime: self.mtime,
            ino: self.ino,
        }
    }
}

/// A directory in the index.
#[derive(Debug)]
pub struct DirInode {
    children: IndexMap<String, Inode>,
    mtime: SystemTime,
    ino: u64,
}

impl DirInode {
    fn new() -> Self {
        Self {
            children: IndexMap::new(),
            mtime: SystemTime::now(),
            ino: next_ino(),
        }
    }

    /// Child names in insertion order.
    pub fn listing(&self) -> Vec<String> {
        self.children.keys().cloned().collect()
    }

    /// Look up a direct child.
    pub fn child(&self, name: &str) -> Option<&Inode> {
        self.children.get(name)
    }

    /// Attributes.
    pub fn attr(&self) -> FileAttr {
        FileAttr {
            size: 4096,
            kind: FileType::Directory,
            perm: 0o555,
            mtime: self.mtime,
            ino: self.ino,
        }
    }
}

/// A node in the index.
#[derive(Debug)]
pub enum Inode {
    File(FileInode),
    Dir(DirInode),
}

impl Inode {
    /// Returns true if this is a file.
    pub fn is_file(&self) -> bool {
        matches!(self, Inode::File(_))
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, Inode::Dir(_))
    }

    /// Attributes of the node.
    pub fn attr(&self) -> FileAttr {
        match self {
            Inode::File(f) => f.attr(),
            Inode::Dir(d) => d.attr(),
        }
    }
}

/// Inode tree with exactly one root directory.
#[derive(Debug)]
pub struct FileIndex {
    /// Always [`Inode::Dir`].
    root: Inode,
}

impl FileIndex {
    /// Build an index from a listing description.
    pub fn from_listing(listing: &ListingNode) -> VfsResult<Self> {
        if listing.kind != ListingKind::Directory {
            return Err(VfsError::invalid_argument(
                "listing root must be a directory",
            ));
        }
        let root = Inode::Dir(Self::build_dir(listing, "/")?);
        Ok(Self { root })
    }

    /// Parse a JSON listing description.
    pub fn from_json(json: &str) -> VfsResult<Self> {
        let listing: ListingNode = serde_json::from_str(json)
            .map_err(|e| VfsError::invalid_argument(format!("malformed listing: {e}")))?;
        Self::from_listing(&listing)
    }

    /// Build from the nested-object index format: `null` (or a size) is a
    /// file, an object is a directory.
    pub fn from_legacy(value: &serde_json::Value) -> VfsResult<Self> {
        let root = Inode::Dir(Self::legacy_dir(value, "/")?);
        Ok(Self { root })
    }

    fn legacy_dir(value: &serde_json::Value, at: &str) -> VfsResult<DirInode> {
        let serde_json::Value::Object(map) = value else {
            return Err(VfsError::invalid_argument(format!(
                "listing entry {at} must be an object"
            )));
        };
        let mut dir = DirInode::new();
        for (name, child) in map {
            Self::check_name(name, at)?;
            let child_path = path::join(at, name);
            let inode = match child {
                serde_json::Value::Null => Inode::File(FileInode::new(None)),
                serde_json::Value::Number(n) => {
                    let size = n.as_i64().ok_or_else(|| {
                        VfsError::invalid_argument(format!("bad size for {child_path}"))
                    })?;
                    Inode::File(FileInode::new(Self::wire_size(size, &child_path)?))
                }
                serde_json::Value::Object(_) => Inode::Dir(Self::legacy_dir(child, &child_path)?),
                _ => {
                    return Err(VfsError::invalid_argument(format!(
                        "listing entry {child_path} is neither a file nor a directory"
                    )));
                }
            };
            dir.children.insert(name.clone(), inode);
        }
        Ok(dir)
    }

    fn build_dir(node: &ListingNode, at: &str) -> VfsResult<DirInode> {
        if node.size.is_some() {
            return Err(VfsError::invalid_argument(format!(
                "directory {at} carries a size"
            )));
        }
        let mut dir = DirInode::new();
        for child in node.children.iter().flatten() {
            Self::check_name(&child.name, at)?;
            let child_path = path::join(at, &child.name);
            if dir.children.contains_key(&child.name) {
                return Err(VfsError::invalid_argument(format!(
                    "duplicate listing entry {child_path}"
                )));
            }
            let inode = match child.kind {
                ListingKind::Directory => Inode::Dir(Self::build_dir(child, &child_path)?),
                ListingKind::File => {
                    if child.children.is_some() {
                        return Err(VfsError::invalid_argument(format!(
                            "file {child_path} carries children"
                        )));
                    }
                    let size = match child.size {
                        Some(size) => Self::wire_size(size, &child_path)?,
                        None => None,
                    };
                    Inode::File(FileInode::new(size))
                }
            };
            dir.children.insert(child.name.clone(), inode);
        }
        Ok(dir)
    }

    fn check_name(name: &str, at: &str) -> VfsResult<()> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(VfsError::invalid_argument(format!(
                "invalid entry name {name:?} under {at}"
            )));
        }
        Ok(())
    }

    fn wire_size(size: i64, at: &str) -> VfsResult<Option<u64>> {
        match size {
            UNKNOWN_SIZE => Ok(None),
            s if s >= 0 => Ok(Some(s as u64)),
            s => Err(VfsError::invalid_argument(format!("negative size {s} for {at}"))),
        }
    }

    /// The root directory node.
    pub fn root(&self) -> &Inode {
        &self.root
    }

    /// Walk the tree to `path`; `/` resolves to the root.
    ///
    /// Returns `None` as soon as a segment is missing or a non-terminal
    /// segment is a file.
    pub fn resolve(&self, path: &str) -> Option<&Inode> {
        let mut node = &self.root;
        for segment in path::segments(path) {
            node = match node {
                Inode::Dir(d) => d.children.get(&segment)?,
                Inode::File(_) => return None,
            };
        }
        Some(node)
    }

    /// Attributes at `path`.
    pub fn attr(&self, path: &str) -> Option<FileAttr> {
        self.resolve(path).map(Inode::attr)
    }

    /// Returns true if `path` names a directory (the root included).
    pub fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).is_some_and(Inode::is_dir)
    }

    fn resolve_dir(&self, path: &str) -> VfsResult<&DirInode> {
        match self.resolve(path) {
            Some(Inode::Dir(d)) => Ok(d),
            Some(Inode::File(_)) => Err(VfsError::not_a_directory(path::normalize(path))),
            None => Err(VfsError::not_found(path::normalize(path))),
        }
    }

    /// Mutable access to the file at `path`.
    pub fn file_mut(&mut self, path: &str) -> Option<&mut FileInode> {
        let mut node = &mut self.root;
        for segment in path::segments(path) {
            node = match node {
                Inode::Dir(d) => d.children.get_mut(&segment)?,
                Inode::File(_) => return None,
            };
        }
        match node {
            Inode::File(f) => Some(f),
            Inode::Dir(_) => None,
        }
    }

    /// Child names of the directory at `path`, in listing order.
    pub fn list(&self, path: &str) -> VfsResult<Vec<String>> {
        self.resolve_dir(path).map(DirInode::listing)
    }

    /// Attach `bytes` as the content of the file at `path`.
    ///
    /// Repeating a preload with identical bytes keeps the existing handle.
    pub fn preload(&mut self, path: &str, bytes: Vec<u8>) -> VfsResult<()> {
        let normalized = path::normalize(path);
        let file = self
            .file_mut(&normalized)
            .ok_or_else(|| VfsError::not_found(normalized.clone()))?;

        if file.handle.as_ref().is_some_and(|h| h.content_eq(&bytes)) {
            return Ok(());
        }
        file.size = Some(bytes.len() as u64);
        let handle = FileHandle::new(normalized, OpenFlags::read(), file.attr(), bytes);
        file.handle = Some(Arc::new(handle));
        Ok(())
    }

    /// Attach an already-built handle, recording its size.
    pub fn attach(&mut self, path: &str, handle: Arc<FileHandle>) -> VfsResult<()> {
        let normalized = path::normalize(path);
        let file = self
            .file_mut(&normalized)
            .ok_or_else(|| VfsError::not_found(normalized))?;
        file.size = Some(handle.size());
        file.handle = Some(handle);
        Ok(())
    }

    /// Record a probed size for the file at `path`.
    pub fn set_size(&mut self, path: &str, size: u64) -> VfsResult<()> {
        let normalized = path::normalize(path);
        let file = self
            .file_mut(&normalized)
            .ok_or_else(|| VfsError::not_found(normalized))?;
        file.size = Some(size);
        Ok(())
    }

    /// Detach every content handle, keeping sizes already known.
    ///
    /// Returns the number of handles released.
    pub fn evict_all(&mut self) -> usize {
        fn evict(node: &mut Inode) -> usize {
            match node {
                Inode::File(f) => usize::from(f.handle.take().is_some()),
                Inode::Dir(d) => d.children.values_mut().map(evict).sum(),
            }
        }
        evict(&mut self.root)
    }

    /// Number of files in the tree.
    pub fn file_count(&self) -> usize {
        fn count(node: &Inode) -> usize {
            match node {
                Inode::File(_) => 1,
                Inode::Dir(d) => d.children.values().map(count).sum(),
            }
        }
        count(&self.root)
    }

    /// Number of directories in the tree, the root included.
    pub fn dir_count(&self) -> usize {
        fn count(node: &Inode) -> usize {
            match node {
                Inode::File(_) => 0,
                Inode::Dir(d) => 1 + d.children.values().map(count).sum::<usize>(),
            }
        }
        count(&self.root)
    }
}
