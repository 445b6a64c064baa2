//! Folder descriptors and lookup flags.

use serde::{Deserialize, Serialize};

/// Lightweight folder descriptor used for listing and subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderInfo {
    /// Full folder name including hierarchy (e.g. `Lists/rust`).
    pub full_name: String,
    /// Last hierarchy component.
    pub name: String,
    /// Total message count, if known.
    pub total: Option<u32>,
    /// Unread message count, if known.
    pub unread: Option<u32>,
    /// Whether the folder is subscribed.
    pub subscribed: bool,
    /// Whether the folder can contain messages.
    pub holds_messages: bool,
    /// Whether the folder can contain subfolders.
    pub holds_folders: bool,
}

impl FolderInfo {
    /// Creates a descriptor for a message folder with unknown counts.
    #[must_use]
    pub fn new(full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        let name = full_name
            .rsplit_once('/')
            .map_or_else(|| full_name.clone(), |(_, n)| n.to_string());
        Self {
            full_name,
            name,
            total: None,
            unread: None,
            subscribed: false,
            holds_messages: true,
            holds_folders: true,
        }
    }

    /// Returns true if `self` is `top` or lies below it.
    #[must_use]
    pub fn is_under(&self, top: &str) -> bool {
        top.is_empty()
            || self.full_name == top
            || self
                .full_name
                .strip_prefix(top)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// What a folder can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderCapabilities {
    /// Folder can hold messages.
    pub holds_messages: bool,
    /// Folder can hold subfolders.
    pub holds_folders: bool,
}

impl Default for FolderCapabilities {
    fn default() -> Self {
        Self {
            holds_messages: true,
            holds_folders: true,
        }
    }
}

/// Options for [`DiscoStore::get_folder`](crate::DiscoStore::get_folder).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetFolderFlags {
    /// Create the folder if it does not exist.
    pub create: bool,
}

impl GetFolderFlags {
    /// Flags requesting creation.
    #[must_use]
    pub const fn create() -> Self {
        Self { create: true }
    }
}

/// Options for [`DiscoStore::get_folder_info`](crate::DiscoStore::get_folder_info).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderInfoFlags {
    /// Include the whole subtree below `top`, not just direct children.
    pub recursive: bool,
    /// Only list subscribed folders.
    pub subscribed_only: bool,
    /// Skip message counts.
    pub fast: bool,
}
