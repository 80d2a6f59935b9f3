//! Shipped backends.

mod indexed;
mod local;
mod memory;

pub use indexed::{ContentSource, DirectorySource, IndexedFileSystem};
pub use local::LocalBackend;
pub use memory::MemoryBackend;
