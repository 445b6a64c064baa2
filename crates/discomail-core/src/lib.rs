//! # discomail-core
//!
//! Disconnectable mail stores for `discomail`.
//!
//! This crate provides:
//! - **Disco Store** - one connectivity status per store, with every store
//!   operation dispatched to an online or an offline backend hook
//! - **Disco Folder** - folder operations dispatched the same way, with
//!   successful offline mutations written to the diary
//! - **Operation Diary** - durable, ordered log of offline mutations
//!   (`SQLite`)
//! - **Diary Replayer** - re-issues the diary online after reconnecting
//! - **Summary Index** - cached per-message metadata (`SQLite`)
//! - **Store events** - folder and row change notifications
//! - **Memory backend** - reference backend for tests and demos

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
pub mod diary;
mod error;
pub mod events;
mod folder;
pub mod replay;
mod status;
pub mod storage;
mod store;
pub mod summary;
pub mod types;

pub use config::{DiscoConfig, OFFLINE_ENV, ReplayFailurePolicy};
pub use diary::{Diary, DiaryEntry, LoggedEntry, UidMapEntry};
pub use error::{Error, Result};
pub use events::StoreEvent;
pub use folder::{DiscoFolder, FolderBackend};
pub use replay::{ReplayExecutor, ReplayFailure, ReplayReport, Replayer, TransferItem};
pub use status::ConnectivityStatus;
pub use storage::LocalStorage;
pub use store::{DiscoStore, StoreBackend};
pub use summary::{MessageInfo, SummaryChanges, SummaryIndex, SummaryRepository};
pub use types::{
    Envelope, Flag, Flags, FolderCapabilities, FolderInfo, FolderInfoFlags, GetFolderFlags,
    Message, Uid, UidMapping,
};
