//! Message identifiers.

use serde::{Deserialize, Serialize};

const OFFLINE_PREFIX: &str = "offline-";

/// Stable per-folder message identifier.
///
/// UIDs are opaque strings so that both remote-assigned identifiers (`"17"`)
/// and identifiers assigned locally while offline (`"offline-1"`) can live in
/// the same summary. Offline-assigned UIDs must be created with
/// [`Uid::offline`] so the replayer can tell them apart from remote ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    /// Creates a UID from its string form.
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Creates the `n`th offline-assigned UID.
    #[must_use]
    pub fn offline(n: u64) -> Self {
        Self(format!("{OFFLINE_PREFIX}{n}"))
    }

    /// Returns true if this UID was assigned locally while offline.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.0.starts_with(OFFLINE_PREFIX)
    }

    /// Returns the sequence number of an offline-assigned UID.
    #[must_use]
    pub fn offline_sequence(&self) -> Option<u64> {
        self.0.strip_prefix(OFFLINE_PREFIX)?.parse().ok()
    }

    /// Returns the UID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u32> for Uid {
    fn from(n: u32) -> Self {
        Self(n.to_string())
    }
}

impl From<&str> for Uid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pairing of a source UID with the UID it received in a destination folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UidMapping {
    /// UID in the source folder.
    pub source: Uid,
    /// UID assigned in the destination folder.
    pub destination: Uid,
}

impl UidMapping {
    /// Creates a new mapping.
    #[must_use]
    pub const fn new(source: Uid, destination: Uid) -> Self {
        Self {
            source,
            destination,
        }
    }
}
