//! Open flags and the open-mode decision table.
//!
//! [`OpenFlags::resolve`] is the single place that decides what an `open`
//! does with an existing or missing target. Every backend calls it, so the
//! same flags behave the same whichever store services the call.

use std::fmt;
use std::str::FromStr;

use crate::error::{VfsError, VfsResult};

/// What an `open` call should do with its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAction {
    /// Use the existing content (and a cached handle, if there is one).
    Reuse,
    /// Create an empty file.
    CreateFile,
    /// Discard the existing content.
    Truncate,
    /// Target exists but the mode demanded exclusive creation.
    RejectExists,
    /// Target is missing and the mode does not allow creating it.
    RejectMissing,
    /// The flags contradict each other.
    InvalidMode,
}

impl OpenAction {
    /// Turn the rejecting actions into their errors.
    ///
    /// Non-rejecting actions are returned unchanged.
    pub fn into_result(self, path: &str) -> VfsResult<OpenAction> {
        match self {
            OpenAction::RejectExists => Err(VfsError::already_exists(path)),
            OpenAction::RejectMissing => Err(VfsError::not_found(path)),
            OpenAction::InvalidMode => Err(VfsError::invalid_argument(format!(
                "invalid open mode for {}",
                path
            ))),
            action => Ok(action),
        }
    }
}

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            exclusive: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access (`r`).
    pub fn read() -> Self {
        Self::default()
    }

    /// Read and write an existing file (`r+`).
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// Create or truncate for writing (`w`).
    pub fn write() -> Self {
        Self {
            read: false,
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }

    /// Append, creating if missing (`a`).
    pub fn append() -> Self {
        Self {
            read: false,
            write: true,
            append: true,
            create: true,
            ..Default::default()
        }
    }

    /// Create with write access, keeping existing content.
    pub fn create() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Create exclusively (fail if exists).
    pub fn create_exclusive() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            exclusive: true,
            ..Default::default()
        }
    }

    /// Create and truncate.
    pub fn create_truncate() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }

    /// Returns true if the handle may be written.
    pub fn is_writeable(&self) -> bool {
        self.write
    }

    /// Returns true if the handle may be read.
    pub fn is_readable(&self) -> bool {
        self.read
    }

    /// Returns true if the flags contradict each other.
    pub fn is_malformed(&self) -> bool {
        (!self.read && !self.write)
            || (self.exclusive && !self.create)
            || (self.truncate && !self.write)
            || (self.create && !self.write)
            || (self.append && self.truncate)
    }

    /// Decide what opening a target with these flags does.
    pub fn resolve(&self, target_exists: bool) -> OpenAction {
        if self.is_malformed() {
            return OpenAction::InvalidMode;
        }
        if target_exists {
            if self.exclusive {
                OpenAction::RejectExists
            } else if self.truncate {
                OpenAction::Truncate
            } else {
                OpenAction::Reuse
            }
        } else if self.create {
            OpenAction::CreateFile
        } else {
            OpenAction::RejectMissing
        }
    }
}

/// Parse the conventional mode strings (`r`, `r+`, `w`, `wx+`, `a+`, ...).
impl FromStr for OpenFlags {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let mut flags = match chars.next() {
            Some('r') => OpenFlags::read(),
            Some('w') => OpenFlags::write(),
            Some('a') => OpenFlags::append(),
            _ => return Err(VfsError::invalid_argument(format!("invalid flag string: {s}"))),
        };

        let rest: String = chars.collect();
        let (exclusive, rest) = match rest.strip_prefix('x') {
            Some(r) => (true, r),
            None => (false, rest.as_str()),
        };
        // `s` (synchronous) has no meaning here, every store applies writes in order anyway
        let rest = rest.strip_prefix('s').unwrap_or(rest);
        let plus = match rest {
            "" => false,
            "+" => true,
            _ => return Err(VfsError::invalid_argument(format!("invalid flag string: {s}"))),
        };

        if exclusive {
            if !flags.create {
                return Err(VfsError::invalid_argument(format!(
                    "exclusive flag requires a creating mode: {s}"
                )));
            }
            flags.exclusive = true;
        }
        if plus {
            flags.read = true;
            flags.write = true;
        }
        Ok(flags)
    }
}

impl OpenFlags {
    /// The mode string for these flags, if there is one that parses back to
    /// exactly the same flags.
    pub fn mode_str(&self) -> Option<String> {
        let base = if self.append {
            "a"
        } else if self.truncate || self.create {
            "w"
        } else {
            "r"
        };
        let exclusive = if self.exclusive { "x" } else { "" };
        let plus = match base {
            "r" => self.write,
            _ => self.read,
        };
        let mode = format!("{base}{exclusive}{}", if plus { "+" } else { "" });
        match mode.parse::<OpenFlags>() {
            Ok(parsed) if parsed == *self => Some(mode),
            _ => None,
        }
    }
}

/// Renders the mode string when one exists, otherwise the set flags joined
/// by `|` (e.g. `read|write|create` for [`OpenFlags::create`]).
impl fmt::Display for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(mode) = self.mode_str() {
            return f.write_str(&mode);
        }
        let names = [
            (self.read, "read"),
            (self.write, "write"),
            (self.append, "append"),
            (self.create, "create"),
            (self.truncate, "truncate"),
            (self.exclusive, "exclusive"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&set.join("|"))
        }
    }
}
