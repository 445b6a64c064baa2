//! Diary data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Uid;

/// A mutation performed while offline, recorded for replay.
///
/// UIDs are the exact ones the offline operation used. Offline-assigned
/// UIDs are translated through the diary's UID map at replay time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DiaryEntry {
    /// A message was appended to `folder` and stored locally under `uid`.
    Append {
        /// Folder full name.
        folder: String,
        /// UID assigned by the offline append.
        uid: Uid,
    },
    /// Messages were expunged from `folder`.
    Expunge {
        /// Folder full name.
        folder: String,
        /// Expunged UIDs.
        uids: Vec<Uid>,
    },
    /// Messages were copied between folders of the same store.
    Copy {
        /// Source folder full name.
        source: String,
        /// Destination folder full name.
        destination: String,
        /// Source UIDs.
        uids: Vec<Uid>,
        /// UIDs the copies received in the destination, positionally
        /// matching `uids`.
        #[serde(default)]
        destination_uids: Vec<Uid>,
    },
    /// Messages were moved between folders of the same store.
    Move {
        /// Source folder full name.
        source: String,
        /// Destination folder full name.
        destination: String,
        /// Source UIDs.
        uids: Vec<Uid>,
        /// UIDs the messages received in the destination, positionally
        /// matching `uids`.
        #[serde(default)]
        destination_uids: Vec<Uid>,
    },
}

impl DiaryEntry {
    /// Short name of the operation.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Append { .. } => "append",
            Self::Expunge { .. } => "expunge",
            Self::Copy { .. } => "copy",
            Self::Move { .. } => "move",
        }
    }

    /// The folder the entry is filed under (the source for transfers).
    #[must_use]
    pub fn folder(&self) -> &str {
        match self {
            Self::Append { folder, .. } | Self::Expunge { folder, .. } => folder.as_str(),
            Self::Copy { source, .. } | Self::Move { source, .. } => source.as_str(),
        }
    }

    /// Every folder the entry touches.
    #[must_use]
    pub fn folders(&self) -> Vec<&str> {
        match self {
            Self::Append { folder, .. } | Self::Expunge { folder, .. } => vec![folder.as_str()],
            Self::Copy {
                source,
                destination,
                ..
            }
            | Self::Move {
                source,
                destination,
                ..
            } => vec![source.as_str(), destination.as_str()],
        }
    }
}

impl std::fmt::Display for DiaryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |uids: &[Uid]| {
            uids.iter()
                .map(Uid::as_str)
                .collect::<Vec<_>>()
                .join(",")
        };
        match self {
            Self::Append { folder, uid } => write!(f, "append {folder} {uid}"),
            Self::Expunge { folder, uids } => write!(f, "expunge {folder} [{}]", join(uids)),
            Self::Copy {
                source,
                destination,
                uids,
                ..
            } => write!(f, "copy {source} -> {destination} [{}]", join(uids)),
            Self::Move {
                source,
                destination,
                uids,
                ..
            } => write!(f, "move {source} -> {destination} [{}]", join(uids)),
        }
    }
}

/// A diary entry as stored, with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedEntry {
    /// Position in the log; replay follows ascending order.
    pub seq: i64,
    /// The recorded operation.
    pub entry: DiaryEntry,
    /// When the entry was logged.
    pub logged_at: DateTime<Utc>,
    /// Failed replay attempts so far.
    pub attempts: u32,
    /// Error from the last failed replay attempt.
    pub last_error: Option<String>,
}

/// One offline UID resolved to the UID the remote assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UidMapEntry {
    /// Folder the UIDs belong to.
    pub folder: String,
    /// UID assigned while offline.
    pub offline: Uid,
    /// UID assigned by the remote during replay.
    pub online: Uid,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn entries_serialize_with_op_tag() {
        let entry = DiaryEntry::Expunge {
            folder: "INBOX".into(),
            uids: vec![Uid::from(3), Uid::offline(1)],
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(
            json,
            r#"{"op":"expunge","folder":"INBOX","uids":["3","offline-1"]}"#
        );
        assert_eq!(serde_json::from_str::<DiaryEntry>(&json).unwrap(), entry);
    }

    #[test]
    fn transfer_entries_tolerate_missing_destination_uids() {
        let json = r#"{"op":"move","source":"INBOX","destination":"Archive","uids":["1"]}"#;
        let entry: DiaryEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.kind(), "move");
        assert_eq!(entry.folders(), vec!["INBOX", "Archive"]);
        assert_eq!(entry.to_string(), "move INBOX -> Archive [1]");
    }
}
