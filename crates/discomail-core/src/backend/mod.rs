//! Store backends.
//!
//! Protocol backends (IMAP, NNTP, ...) implement [`StoreBackend`] and
//! [`FolderBackend`](crate::FolderBackend). The in-memory backend here is a
//! complete reference implementation used for testing and demos.
//!
//! [`StoreBackend`]: crate::StoreBackend

pub mod memory;

pub use memory::{MemoryCache, MemoryFolder, MemoryRemote, MemoryStore};
