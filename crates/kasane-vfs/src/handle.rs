//! Content handles.
//!
//! A [`FileHandle`] is the in-memory content of an open file plus the flags
//! it was opened with. Handles are shared through `Arc`: two callers holding
//! the same handle see the same bytes, like two opens of one already-open
//! file. Changes stay in the handle until the owning backend's `flush`
//! persists them.

use parking_lot::RwLock;
use std::time::SystemTime;

use crate::error::{VfsError, VfsResult};
use crate::flags::OpenFlags;
use crate::types::FileAttr;

/// Largest content an in-memory buffer may grow to.
pub const MAX_BUFFER_LEN: u64 = 1 << 32;

/// Byte range `offset..offset + len` of an in-memory buffer, rejected when
/// it would grow past [`MAX_BUFFER_LEN`].
pub(crate) fn buffer_range(path: &str, offset: u64, len: usize) -> VfsResult<std::ops::Range<usize>> {
    let end = u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len))
        .filter(|end| *end <= MAX_BUFFER_LEN)
        .ok_or_else(|| {
            VfsError::invalid_argument(format!("{path}: write at offset {offset} exceeds maximum file size"))
        })?;
    let to_usize = |n: u64| {
        usize::try_from(n)
            .map_err(|_| VfsError::invalid_argument(format!("{path}: offset {n} out of range")))
    };
    Ok(to_usize(offset)?..to_usize(end)?)
}

/// Buffer length for a truncate to `len`, with the same bound.
pub(crate) fn buffer_len(path: &str, len: u64) -> VfsResult<usize> {
    if len > MAX_BUFFER_LEN {
        return Err(VfsError::invalid_argument(format!(
            "{path}: length {len} exceeds maximum file size"
        )));
    }
    usize::try_from(len)
        .map_err(|_| VfsError::invalid_argument(format!("{path}: length {len} out of range")))
}

#[derive(Debug)]
struct HandleState {
    data: Vec<u8>,
    attr: FileAttr,
    dirty: bool,
}

/// Open file content.
#[derive(Debug)]
pub struct FileHandle {
    path: String,
    flags: OpenFlags,
    state: RwLock<HandleState>,
}

impl FileHandle {
    /// Create a handle over `data`; the attribute size is set from the data.
    pub fn new(path: impl Into<String>, flags: OpenFlags, mut attr: FileAttr, data: Vec<u8>) -> Self {
        attr.size = data.len() as u64;
        Self {
            path: path.into(),
            flags,
            state: RwLock::new(HandleState {
                data,
                attr,
                dirty: false,
            }),
        }
    }

    /// Path this handle was opened at, relative to its backend.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Flags the handle was created with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Current attributes.
    pub fn attr(&self) -> FileAttr {
        self.state.read().attr.clone()
    }

    /// Current size in bytes.
    pub fn size(&self) -> u64 {
        self.state.read().data.len() as u64
    }

    /// Returns true if the content changed since the last flush.
    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Mark the content as persisted.
    pub fn mark_clean(&self) {
        self.state.write().dirty = false;
    }

    /// Copy of the whole content.
    pub fn contents(&self) -> Vec<u8> {
        self.state.read().data.clone()
    }

    /// Returns true if the content equals `other`.
    pub fn content_eq(&self, other: &[u8]) -> bool {
        self.state.read().data == other
    }

    /// Read up to `len` bytes starting at `offset`.
    pub fn read(&self, offset: u64, len: usize) -> VfsResult<Vec<u8>> {
        if !self.flags.is_readable() {
            return Err(VfsError::permission_denied(format!(
                "{} was not opened for reading",
                self.path
            )));
        }
        let state = self.state.read();
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(state.data.len());
        let end = start.saturating_add(len).min(state.data.len());
        Ok(state.data[start..end].to_vec())
    }

    /// Write `data` at `offset` (at the end in append mode).
    ///
    /// Returns the number of bytes written.
    pub fn write(&self, offset: u64, data: &[u8]) -> VfsResult<usize> {
        if !self.flags.is_writeable() {
            return Err(VfsError::permission_denied(format!(
                "{} was not opened for writing",
                self.path
            )));
        }
        let mut state = self.state.write();
        let offset = if self.flags.append {
            state.data.len() as u64
        } else {
            offset
        };
        let range = buffer_range(&self.path, offset, data.len())?;
        if range.end > state.data.len() {
            state.data.resize(range.end, 0);
        }
        state.data[range].copy_from_slice(data);
        state.attr.size = state.data.len() as u64;
        state.attr.mtime = SystemTime::now();
        state.dirty = true;
        Ok(data.len())
    }

    /// Resize the content, zero-filling when growing.
    pub fn truncate(&self, len: u64) -> VfsResult<()> {
        if !self.flags.is_writeable() {
            return Err(VfsError::permission_denied(format!(
                "{} was not opened for writing",
                self.path
            )));
        }
        let new_len = buffer_len(&self.path, len)?;
        let mut state = self.state.write();
        state.data.resize(new_len, 0);
        state.attr.size = len;
        state.attr.mtime = SystemTime::now();
        state.dirty = true;
        Ok(())
    }
}
