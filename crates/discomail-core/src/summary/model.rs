//! Summary data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Envelope, Flags, Message, Uid};

/// Cached per-message metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    /// Message UID within its folder.
    pub uid: Uid,
    /// Current flags.
    pub flags: Flags,
    /// Message size in bytes.
    pub size: u64,
    /// Cached header fields.
    pub envelope: Envelope,
    /// Flags were changed locally and not yet pushed to the remote.
    pub flags_changed: bool,
    /// When the record was cached.
    pub cached_at: DateTime<Utc>,
}

impl MessageInfo {
    /// Creates a record with no envelope data.
    #[must_use]
    pub fn new(uid: Uid, flags: Flags) -> Self {
        Self {
            uid,
            flags,
            size: 0,
            envelope: Envelope::default(),
            flags_changed: false,
            cached_at: Utc::now(),
        }
    }

    /// Creates a record describing `message`.
    #[must_use]
    pub fn from_message(uid: Uid, message: &Message, flags: Flags) -> Self {
        Self {
            uid,
            flags,
            size: message.len() as u64,
            envelope: message.envelope(),
            flags_changed: false,
            cached_at: Utc::now(),
        }
    }

    /// Returns a copy of this record under a different UID.
    #[must_use]
    pub fn with_uid(&self, uid: Uid) -> Self {
        Self {
            uid,
            ..self.clone()
        }
    }
}
