//! Store change notifications.
//!
//! Events are published on a `tokio::sync::broadcast` channel while the
//! store's dispatch lock is held, so events for one folder arrive in the
//! order the underlying mutations happened.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::replay::ReplayFailure;
use crate::status::ConnectivityStatus;
use crate::types::{FolderInfo, Uid};

/// A change observed on a store or one of its folders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A folder became known locally.
    FolderCreated(FolderInfo),
    /// A folder's summary was written back.
    FolderUpdated(FolderInfo),
    /// A folder is gone from the remote.
    FolderRemoved {
        /// Full folder name.
        folder: String,
    },
    /// A summary record was added or changed.
    RowChanged {
        /// Full folder name.
        folder: String,
        /// Affected message.
        uid: Uid,
    },
    /// A summary record was removed.
    RowDeleted {
        /// Full folder name.
        folder: String,
        /// Affected message.
        uid: Uid,
    },
    /// The store switched connectivity status.
    StatusChanged {
        /// The new status.
        status: ConnectivityStatus,
    },
    /// A diary entry could not be replayed.
    ReplayFailed(ReplayFailure),
}

impl StoreEvent {
    /// Folder the event concerns, if any.
    #[must_use]
    pub fn folder(&self) -> Option<&str> {
        match self {
            Self::FolderCreated(info) | Self::FolderUpdated(info) => Some(info.full_name.as_str()),
            Self::FolderRemoved { folder }
            | Self::RowChanged { folder, .. }
            | Self::RowDeleted { folder, .. } => Some(folder.as_str()),
            Self::ReplayFailed(failure) => Some(failure.entry.folder()),
            Self::StatusChanged { .. } => None,
        }
    }
}

/// Sending half of the event channel.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub(crate) fn emit(&self, event: StoreEvent) {
        trace!(?event, "store event");
        let _ = self.sender.send(event);
    }

    pub(crate) fn row_changed(&self, folder: &str, uid: &Uid) {
        self.emit(StoreEvent::RowChanged {
            folder: folder.to_string(),
            uid: uid.clone(),
        });
    }

    pub(crate) fn row_deleted(&self, folder: &str, uid: &Uid) {
        self.emit(StoreEvent::RowDeleted {
            folder: folder.to_string(),
            uid: uid.clone(),
        });
    }
}
