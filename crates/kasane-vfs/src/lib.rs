//! # kasane-vfs
//!
//! Composable virtual filesystem layer. Key components:
//!
//! - [`FileSystem`] / [`SyncFileSystem`] - Backend capability contract, in
//!   asynchronous and synchronous calling conventions
//! - [`MountTable`] - Routes operations to backends by longest path prefix
//! - [`FileIndex`] / [`IndexedFileSystem`] - Read-only tree described by a
//!   listing, with lazily fetched and cached content
//! - [`AsyncMirror`] - Fast store mirroring a slow one, with ordered
//!   write-through
//! - [`MemoryBackend`] - In-memory tree (default mount root, testing)
//! - [`LocalBackend`] - Host directory access (with path security)
//!
//! ## Design Decisions
//!
//! - **Paths are strings**: `/`-separated and host independent; see [`path`].
//! - **One open decision table**: every backend resolves open flags through
//!   [`OpenFlags::resolve`], so the same flags behave the same everywhere.
//! - **Capabilities are queried, not assumed**: composites check
//!   [`FileSystem::is_read_only`] and [`FileSystem::as_sync`] before
//!   delegating.

pub mod backends;
mod error;
mod flags;
mod handle;
pub mod index;
mod mirror;
mod mount;
mod ops;
pub mod path;
pub mod registry;
mod types;

pub use backends::{ContentSource, DirectorySource, IndexedFileSystem, LocalBackend, MemoryBackend};
pub use error::{ErrorKind, VfsError, VfsResult};
pub use flags::{OpenAction, OpenFlags};
pub use handle::{FileHandle, MAX_BUFFER_LEN};
pub use index::{FileIndex, ListingNode};
pub use mirror::{AsyncMirror, MirrorState, ReplayFailure};
pub use mount::{MountInfo, MountTable};
pub use ops::{FileSystem, SyncFileSystem};
pub use registry::{BackendConfig, BackendKind, BuiltFileSystem, ConfigError};
pub use types::{FileAttr, FileType};
