//! Core VFS types.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

static NEXT_INO: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique inode number.
///
/// Inode numbers carry no meaning beyond identity.
pub fn next_ino() -> u64 {
    NEXT_INO.fetch_add(1, Ordering::Relaxed)
}

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// File attributes (metadata).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Size in bytes.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Unix permissions (e.g., 0o644).
    pub perm: u32,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Inode number, for identity comparisons only.
    pub ino: u64,
}

impl FileAttr {
    /// Create attributes for a new file.
    pub fn file(size: u64, perm: u32) -> Self {
        Self {
            size,
            kind: FileType::File,
            perm,
            mtime: SystemTime::now(),
            ino: next_ino(),
        }
    }

    /// Create attributes for a new directory.
    pub fn directory(perm: u32) -> Self {
        Self {
            size: 4096,
            kind: FileType::Directory,
            perm,
            mtime: SystemTime::now(),
            ino: next_ino(),
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}
