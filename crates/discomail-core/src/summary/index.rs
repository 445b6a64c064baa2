//! In-memory summary index for one folder.

use std::collections::BTreeMap;

use super::model::MessageInfo;
use crate::types::{Flags, FolderInfo, Uid};
use crate::{Error, Result};

/// Result of merging a remote listing into the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryChanges {
    /// UIDs that were added or whose record changed.
    pub changed: Vec<Uid>,
    /// UIDs that disappeared.
    pub removed: Vec<Uid>,
}

impl SummaryChanges {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Maps UIDs to cached [`MessageInfo`] records for one folder.
///
/// Loaded from the local database when a folder is opened and written back
/// on `sync`. Mutations replace whole records; flag changes are merged into
/// the stored record.
#[derive(Debug, Clone)]
pub struct SummaryIndex {
    folder: String,
    infos: BTreeMap<Uid, MessageInfo>,
    dirty: bool,
}

impl SummaryIndex {
    /// Creates an empty index for `folder`.
    #[must_use]
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            infos: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Creates an index from loaded records. The result is clean.
    #[must_use]
    pub fn from_infos(folder: impl Into<String>, infos: Vec<MessageInfo>) -> Self {
        Self {
            folder: folder.into(),
            infos: infos.into_iter().map(|i| (i.uid.clone(), i)).collect(),
            dirty: false,
        }
    }

    /// Folder this index belongs to.
    #[must_use]
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Looks up a record.
    #[must_use]
    pub fn get(&self, uid: &Uid) -> Option<&MessageInfo> {
        self.infos.get(uid)
    }

    /// Returns true if `uid` is summarized.
    #[must_use]
    pub fn contains(&self, uid: &Uid) -> bool {
        self.infos.contains_key(uid)
    }

    /// Inserts or replaces a record.
    pub fn insert(&mut self, info: MessageInfo) {
        self.infos.insert(info.uid.clone(), info);
        self.dirty = true;
    }

    /// Removes a record.
    pub fn remove(&mut self, uid: &Uid) -> Option<MessageInfo> {
        let removed = self.infos.remove(uid);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Moves a record to a new UID. Returns false if `old` is unknown.
    pub fn rename(&mut self, old: &Uid, new: Uid) -> bool {
        match self.infos.remove(old) {
            Some(info) => {
                self.infos.insert(new.clone(), info.with_uid(new));
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Merges a flag change into the record for `uid`.
    ///
    /// Returns whether the flags actually changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUid`] if `uid` is not summarized.
    pub fn set_flags(&mut self, uid: &Uid, mask: &Flags, set: &Flags) -> Result<bool> {
        let info = self
            .infos
            .get_mut(uid)
            .ok_or_else(|| Error::invalid_uid(&self.folder, uid))?;
        let changed = info.flags.merge(mask, set);
        if changed {
            info.flags_changed = true;
            self.dirty = true;
        }
        Ok(changed)
    }

    /// Checks that every UID is summarized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUid`] for the first unknown UID.
    pub fn check_uids(&self, uids: &[Uid]) -> Result<()> {
        match uids.iter().find(|uid| !self.contains(uid)) {
            Some(uid) => Err(Error::invalid_uid(&self.folder, uid)),
            None => Ok(()),
        }
    }

    /// All summarized UIDs.
    #[must_use]
    pub fn uids(&self) -> Vec<Uid> {
        self.infos.keys().cloned().collect()
    }

    /// UIDs of messages flagged as deleted.
    #[must_use]
    pub fn deleted_uids(&self) -> Vec<Uid> {
        self.infos
            .values()
            .filter(|i| i.flags.is_deleted())
            .map(|i| i.uid.clone())
            .collect()
    }

    /// Records with locally changed flags.
    #[must_use]
    pub fn changed_infos(&self) -> Vec<MessageInfo> {
        self.infos
            .values()
            .filter(|i| i.flags_changed)
            .cloned()
            .collect()
    }

    /// Clears the change marker on the given records.
    pub fn clear_changed(&mut self, uids: &[Uid]) {
        for uid in uids {
            if let Some(info) = self.infos.get_mut(uid)
                && info.flags_changed
            {
                info.flags_changed = false;
                self.dirty = true;
            }
        }
    }

    /// Replaces the index contents with an authoritative remote listing.
    ///
    /// Records whose flags were changed locally keep their local flags so
    /// the change can still be pushed on the next online sync.
    pub fn merge_remote(&mut self, remote: Vec<MessageInfo>) -> SummaryChanges {
        let mut changes = SummaryChanges::default();
        let mut next = BTreeMap::new();

        for mut info in remote {
            match self.infos.get(&info.uid) {
                Some(local) if local.flags_changed => {
                    info.flags = local.flags.clone();
                    info.flags_changed = true;
                    if local.envelope != info.envelope {
                        changes.changed.push(info.uid.clone());
                    }
                }
                Some(local) if local.flags == info.flags && local.envelope == info.envelope => {}
                _ => changes.changed.push(info.uid.clone()),
            }
            next.insert(info.uid.clone(), info);
        }
        changes.removed = self
            .infos
            .keys()
            .filter(|uid| !next.contains_key(*uid))
            .cloned()
            .collect();

        if !changes.is_empty() {
            self.dirty = true;
        }
        self.infos = next;
        changes
    }

    /// Iterates over all records in UID order.
    pub fn iter(&self) -> impl Iterator<Item = &MessageInfo> {
        self.infos.values()
    }

    /// Number of summarized messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns true if the folder has no summarized messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Number of messages without the seen flag.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.infos.values().filter(|i| !i.flags.is_seen()).count()
    }

    /// Returns true if the index has unsaved changes.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) const fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Folder descriptor with counts taken from this index.
    #[must_use]
    pub fn folder_info(&self) -> FolderInfo {
        let mut info = FolderInfo::new(self.folder.clone());
        info.total = u32::try_from(self.len()).ok();
        info.unread = u32::try_from(self.unread_count()).ok();
        info
    }
}
