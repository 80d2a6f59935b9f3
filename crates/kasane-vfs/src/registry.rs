//! Backend registry: configuration, validation and construction.
//!
//! The set of backend kinds is closed. A [`BackendConfig`] value (usually
//! read from a RON file) describes a tree of backends; [`validate`] checks
//! it without touching anything, and [`build`] constructs it.
//!
//! ```ron
//! Mountable(mounts: {
//!     "/": InMemory,
//!     "/data": AsyncMirror(sync: InMemory, async_store: LocalDirectory(root: "./data")),
//!     "/static": Indexed(listing: "./static/index.json", root: "./static"),
//! })
//! ```

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use tracing::info;

use crate::backends::{DirectorySource, IndexedFileSystem, LocalBackend, MemoryBackend};
use crate::error::VfsError;
use crate::index::FileIndex;
use crate::mirror::AsyncMirror;
use crate::mount::MountTable;
use crate::ops::FileSystem;
use crate::path;

/// Registered backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr)]
pub enum BackendKind {
    InMemory,
    LocalDirectory,
    Indexed,
    AsyncMirror,
    Mountable,
}

impl BackendKind {
    /// One-line description for listings.
    pub fn description(&self) -> &'static str {
        match self {
            BackendKind::InMemory => "ephemeral in-process tree",
            BackendKind::LocalDirectory => "host directory, asynchronous only",
            BackendKind::Indexed => "read-only tree described by a JSON listing",
            BackendKind::AsyncMirror => "sync store mirroring an async store with write-through",
            BackendKind::Mountable => "mount table routing paths to other backends",
        }
    }
}

/// Configuration of one backend (and, for composites, its children).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendConfig {
    InMemory,
    LocalDirectory {
        root: PathBuf,
        #[serde(default)]
        read_only: bool,
    },
    Indexed {
        /// Listing description (JSON).
        listing: PathBuf,
        /// Directory holding the listed files.
        root: PathBuf,
    },
    AsyncMirror {
        sync: Box<BackendConfig>,
        async_store: Box<BackendConfig>,
    },
    Mountable {
        mounts: BTreeMap<String, BackendConfig>,
    },
}

/// Errors from loading, validating or building a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid configuration at {at}: {reason}")]
    Invalid { at: String, reason: String },
    #[error("backend error: {0}")]
    Vfs(#[from] VfsError),
}

impl ConfigError {
    fn invalid(at: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            at: at.to_string(),
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl BackendConfig {
    /// Parse a RON configuration.
    pub fn from_ron(text: &str) -> ConfigResult<Self> {
        Ok(ron::from_str(text)?)
    }

    /// Read and parse a RON configuration file.
    pub async fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_ron(&text)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::InMemory => BackendKind::InMemory,
            BackendConfig::LocalDirectory { .. } => BackendKind::LocalDirectory,
            BackendConfig::Indexed { .. } => BackendKind::Indexed,
            BackendConfig::AsyncMirror { .. } => BackendKind::AsyncMirror,
            BackendConfig::Mountable { .. } => BackendKind::Mountable,
        }
    }

    /// Whether the built backend will offer the synchronous convention.
    pub fn offers_sync(&self) -> bool {
        match self {
            BackendConfig::InMemory | BackendConfig::Indexed { .. } => true,
            BackendConfig::AsyncMirror { .. } => true,
            BackendConfig::LocalDirectory { .. } => false,
            BackendConfig::Mountable { mounts } => mounts.values().all(Self::offers_sync),
        }
    }

    /// Whether the built backend will accept writes.
    pub fn is_writable(&self) -> bool {
        match self {
            BackendConfig::LocalDirectory { read_only, .. } => !read_only,
            BackendConfig::Indexed { .. } => false,
            _ => true,
        }
    }
}

/// Check a configuration without constructing anything.
pub fn validate(config: &BackendConfig) -> ConfigResult<()> {
    validate_at(config, "/")
}

fn validate_at(config: &BackendConfig, at: &str) -> ConfigResult<()> {
    match config {
        BackendConfig::InMemory => Ok(()),
        BackendConfig::LocalDirectory { root, .. } => {
            if root.as_os_str().is_empty() {
                return Err(ConfigError::invalid(at, "LocalDirectory root is empty"));
            }
            Ok(())
        }
        BackendConfig::Indexed { listing, root } => {
            if listing.as_os_str().is_empty() {
                return Err(ConfigError::invalid(at, "Indexed listing is empty"));
            }
            if root.as_os_str().is_empty() {
                return Err(ConfigError::invalid(at, "Indexed root is empty"));
            }
            Ok(())
        }
        BackendConfig::AsyncMirror { sync, async_store } => {
            if !sync.offers_sync() {
                return Err(ConfigError::invalid(
                    at,
                    format!("{} cannot be the sync side of a mirror", sync.kind()),
                ));
            }
            for (side, store) in [("sync", sync), ("async_store", async_store)] {
                if !store.is_writable() {
                    return Err(ConfigError::invalid(
                        at,
                        format!("{} side of a mirror must be writable", side),
                    ));
                }
            }
            validate_at(sync, at)?;
            validate_at(async_store, at)
        }
        BackendConfig::Mountable { mounts } => {
            for (mount_point, child) in mounts {
                path::check_mount_path(mount_point)
                    .map_err(|e| ConfigError::invalid(at, e.to_string()))?;
                validate_at(child, &path::join(at, mount_point.trim_start_matches('/')))?;
            }
            Ok(())
        }
    }
}

/// A constructed backend tree.
pub struct BuiltFileSystem {
    fs: Arc<dyn FileSystem>,
    mirrors: Vec<Arc<AsyncMirror>>,
}

impl BuiltFileSystem {
    /// The root of the tree.
    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Every mirror in the tree, outermost last.
    pub fn mirrors(&self) -> &[Arc<AsyncMirror>] {
        &self.mirrors
    }

    /// Wait until every mirror has replayed its queued mutations.
    pub async fn drained(&self) {
        for mirror in &self.mirrors {
            mirror.drained().await;
        }
    }
}

/// Validate, then construct the backend tree.
///
/// Mirrors are initialized as part of construction, so this also performs
/// their initial sync.
pub async fn build(config: &BackendConfig) -> ConfigResult<BuiltFileSystem> {
    validate(config)?;
    let mut mirrors = Vec::new();
    let fs = build_into(config, &mut mirrors).await?;
    Ok(BuiltFileSystem { fs, mirrors })
}

fn build_into<'a>(
    config: &'a BackendConfig,
    mirrors: &'a mut Vec<Arc<AsyncMirror>>,
) -> BoxFuture<'a, ConfigResult<Arc<dyn FileSystem>>> {
    async move {
        let backend: Arc<dyn FileSystem> = match config {
            BackendConfig::InMemory => Arc::new(MemoryBackend::new()),
            BackendConfig::LocalDirectory { root, read_only } => {
                let meta = tokio::fs::metadata(root).await?;
                if !meta.is_dir() {
                    return Err(VfsError::not_a_directory(root.display().to_string()).into());
                }
                let mut local = LocalBackend::new(root);
                local.set_read_only(*read_only);
                info!(root = %local.root().display(), read_only = *read_only, "opened local directory");
                Arc::new(local)
            }
            BackendConfig::Indexed { listing, root } => {
                let text = tokio::fs::read_to_string(listing).await?;
                let index = load_index(&text)?;
                info!(
                    listing = %listing.display(),
                    files = index.file_count(),
                    dirs = index.dir_count(),
                    "loaded listing"
                );
                Arc::new(IndexedFileSystem::new(index, DirectorySource::new(root)))
            }
            BackendConfig::AsyncMirror { sync, async_store } => {
                let sync = build_into(sync, mirrors).await?;
                let async_store = build_into(async_store, mirrors).await?;
                let mirror = Arc::new(AsyncMirror::create(sync, async_store).await?);
                mirrors.push(Arc::clone(&mirror));
                mirror
            }
            BackendConfig::Mountable { mounts } => {
                let table = match mounts.get("/") {
                    Some(root) => MountTable::with_root(build_into(root, mirrors).await?),
                    None => MountTable::new(),
                };
                // Sorted keys put every parent before its children
                for (mount_point, child) in mounts.iter().filter(|(k, _)| k.as_str() != "/") {
                    let backend = build_into(child, mirrors).await?;
                    table.mount_arc(mount_point, backend).await?;
                }
                Arc::new(table)
            }
        };
        Ok(backend)
    }
    .boxed()
}

/// Parse either listing format: node objects carry a `type` field, the
/// nested-object format does not.
pub fn load_index(text: &str) -> ConfigResult<FileIndex> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| VfsError::invalid_argument(format!("malformed listing: {e}")))?;
    let index = if value.get("type").is_some_and(|t| t.is_string()) {
        FileIndex::from_json(text)?
    } else {
        FileIndex::from_legacy(&value)?
    };
    Ok(index)
}
