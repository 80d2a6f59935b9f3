//! Virtual path helpers.
//!
//! VFS paths are `/`-separated strings, independent of the host OS. Backends
//! accept absolute or relative forms and normalize them with [`normalize`];
//! mount points must already be in clean form (see [`is_clean_absolute`]).

use crate::error::{VfsError, VfsResult};

/// Normalize a path: leading `/`, no trailing `/`, `.` and `..` resolved.
///
/// `..` above the root stays at the root.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Split a path into its normalized segments (empty for the root).
pub fn segments(path: &str) -> Vec<String> {
    let normalized = normalize(path);
    normalized
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Returns true for `/` or an absolute path with no empty, `.` or `..`
/// segments and no trailing separator.
pub fn is_clean_absolute(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

/// Validate a mount point path.
pub fn check_mount_path(path: &str) -> VfsResult<()> {
    if is_clean_absolute(path) {
        Ok(())
    } else {
        Err(VfsError::invalid_argument(format!(
            "mount point must be an absolute clean path: {:?}",
            path
        )))
    }
}

/// Join a child name onto a directory path.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Parent directory of a normalized path (`None` for the root).
pub fn parent(path: &str) -> Option<String> {
    let normalized = normalize(path);
    if normalized == "/" {
        return None;
    }
    match normalized.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(normalized[..idx].to_string()),
        None => None,
    }
}

/// Last segment of a path (`None` for the root).
pub fn file_name(path: &str) -> Option<String> {
    segments(path).pop()
}

/// If `prefix` is a segment-aligned prefix of `path`, return the remainder
/// as an absolute path (`/` when they are equal).
///
/// `/mnt/x` is a prefix of `/mnt/x/y` but never of `/mnt/xy`. Both inputs
/// must be normalized.
pub fn strip_mount_prefix(path: &str, prefix: &str) -> Option<String> {
    if prefix == "/" {
        return Some(path.to_string());
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        Some(rest.to_string())
    } else {
        None
    }
}
