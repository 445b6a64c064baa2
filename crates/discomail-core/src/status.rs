//! Connectivity status.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Connectivity status of a store.
///
/// Every store and folder operation reads this once and then runs either the
/// online or the offline implementation, never a mix of both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    /// The remote is reachable; online hooks run.
    #[default]
    Online,
    /// Working from the local cache; mutations are journaled.
    Offline,
}

impl ConnectivityStatus {
    /// Returns `true` if online.
    #[must_use]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }

    /// Returns `true` if offline.
    #[must_use]
    pub const fn is_offline(self) -> bool {
        matches!(self, Self::Offline)
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Online => 0,
            Self::Offline => 1,
        }
    }

    const fn from_u8(v: u8) -> Self {
        if v == 0 { Self::Online } else { Self::Offline }
    }
}

impl std::fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Offline => "offline",
        })
    }
}

/// Lock-free cell holding a [`ConnectivityStatus`].
///
/// Reads never block. Writes happen only while the owning store's dispatch
/// lock is held.
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) const fn new(status: ConnectivityStatus) -> Self {
        Self(AtomicU8::new(status.to_u8()))
    }

    pub(crate) fn get(&self) -> ConnectivityStatus {
        ConnectivityStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, status: ConnectivityStatus) {
        self.0.store(status.to_u8(), Ordering::Release);
    }
}
