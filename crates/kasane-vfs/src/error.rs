//! VFS error types.
//!
//! Every operation fails with exactly one [`ErrorKind`]. The kinds are stable
//! identifiers shared by all backends, so a failure means the same thing
//! whichever store produced it.

use std::io;
use thiserror::Error;

/// Stable identifier for a class of failure.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    IsADirectory,
    NotADirectory,
    AlreadyExists,
    InvalidArgument,
    PermissionDenied,
    NotSupported,
    IoError,
    NotEmpty,
}

/// VFS error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed path, listing, or open mode.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Write against a read-only store, or a path escaping its root.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend does not offer the requested capability.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    NotEmpty(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a PermissionDenied error for a write against a read-only store.
    pub fn read_only(path: impl Into<String>) -> Self {
        Self::PermissionDenied(format!("{} is on a read-only filesystem", path.into()))
    }

    /// Create a NotSupported error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create a NotEmpty error.
    pub fn not_empty(path: impl Into<String>) -> Self {
        Self::NotEmpty(path.into())
    }

    /// Create an Io error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// The stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::NotFound(_) => ErrorKind::NotFound,
            VfsError::IsADirectory(_) => ErrorKind::IsADirectory,
            VfsError::NotADirectory(_) => ErrorKind::NotADirectory,
            VfsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            VfsError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            VfsError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            VfsError::NotSupported(_) => ErrorKind::NotSupported,
            VfsError::NotEmpty(_) => ErrorKind::NotEmpty,
            VfsError::Io(_) => ErrorKind::IoError,
        }
    }

    /// Classify a host I/O error, reporting it against the VFS path.
    pub fn host(path: &str, e: io::Error) -> Self {
        Self::classify(e.kind(), format!("{}: {}", path, e))
    }

    fn classify(kind: io::ErrorKind, msg: String) -> Self {
        match kind {
            io::ErrorKind::NotFound => VfsError::NotFound(msg),
            io::ErrorKind::AlreadyExists => VfsError::AlreadyExists(msg),
            io::ErrorKind::PermissionDenied => VfsError::PermissionDenied(msg),
            io::ErrorKind::NotADirectory => VfsError::NotADirectory(msg),
            io::ErrorKind::IsADirectory => VfsError::IsADirectory(msg),
            io::ErrorKind::DirectoryNotEmpty => VfsError::NotEmpty(msg),
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
                VfsError::InvalidArgument(msg)
            }
            io::ErrorKind::Unsupported => VfsError::NotSupported(msg),
            _ => VfsError::Io(msg),
        }
    }

    /// Returns true if this is a NotFound error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Classify a host I/O error.
impl From<io::Error> for VfsError {
    fn from(e: io::Error) -> Self {
        Self::classify(e.kind(), e.to_string())
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::NotSupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            VfsError::NotEmpty(msg) => io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg),
            VfsError::Io(msg) => io::Error::other(msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
