//! Disconnectable folders.
//!
//! A [`DiscoFolder`] wraps a backend's [`FolderBackend`] hooks. Every
//! operation takes the owning store's dispatch lock, reads the connectivity
//! status once and runs either the online or the offline hook. Offline
//! mutations that succeed are written to the diary before the call returns.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::diary::DiaryEntry;
use crate::events::StoreEvent;
use crate::status::ConnectivityStatus;
use crate::store::{DiscoStore, StoreInner};
use crate::summary::{MessageInfo, SummaryIndex};
use crate::types::{Flags, FolderCapabilities, Message, Uid, UidMapping};
use crate::{Error, Result};

/// Online and offline implementations of the folder operations.
///
/// Online hooks may perform network I/O. Offline hooks work on the local
/// cache only. Batch hooks must either apply to every UID or fail without
/// side effects.
#[async_trait]
pub trait FolderBackend: Send + Sync {
    /// Full folder name.
    fn name(&self) -> &str;

    /// What the folder can contain.
    fn capabilities(&self) -> FolderCapabilities {
        FolderCapabilities::default()
    }

    /// Fetch the authoritative message list from the remote.
    async fn refresh_info_online(&self) -> Result<Vec<MessageInfo>>;

    /// Push locally changed flags to the remote.
    async fn sync_online(&self, changed: &[MessageInfo]) -> Result<()>;

    /// Flush local cache state to disk.
    async fn sync_offline(&self) -> Result<()>;

    /// Permanently remove messages on the remote.
    async fn expunge_uids_online(&self, uids: &[Uid]) -> Result<()>;

    /// Remove messages from the local cache.
    async fn expunge_uids_offline(&self, uids: &[Uid]) -> Result<()>;

    /// Upload a message, returning the UID the remote assigned.
    async fn append_online(&self, message: &Message, flags: &Flags) -> Result<Uid>;

    /// Store a message locally under a fresh offline UID.
    async fn append_offline(&self, message: &Message, flags: &Flags) -> Result<Uid>;

    /// Copy messages to `destination` on the remote.
    async fn copy_online(
        &self,
        uids: &[Uid],
        destination: &dyn FolderBackend,
    ) -> Result<Vec<UidMapping>>;

    /// Copy messages to `destination` in the local cache.
    async fn copy_offline(
        &self,
        uids: &[Uid],
        destination: &dyn FolderBackend,
    ) -> Result<Vec<UidMapping>>;

    /// Move messages to `destination` on the remote.
    async fn move_online(
        &self,
        uids: &[Uid],
        destination: &dyn FolderBackend,
    ) -> Result<Vec<UidMapping>>;

    /// Move messages to `destination` in the local cache.
    async fn move_offline(
        &self,
        uids: &[Uid],
        destination: &dyn FolderBackend,
    ) -> Result<Vec<UidMapping>>;

    /// Fetch a message from the remote, caching it locally.
    async fn get_message_online(&self, uid: &Uid) -> Result<Message>;

    /// Read a message from the local cache.
    ///
    /// Fails with [`Error::NotAvailableOffline`] if the body was never cached.
    async fn get_message_offline(&self, uid: &Uid) -> Result<Message>;

    /// Download the given messages so they are readable offline.
    async fn prepare_for_offline(&self, uids: &[Uid]) -> Result<()> {
        let _ = uids;
        Ok(())
    }

    /// The remote now knows the message cached as `offline` by `online`.
    /// Drop the local copy kept under the offline UID.
    async fn resolve_offline_uid(&self, offline: &Uid, online: &Uid) -> Result<()> {
        let _ = (offline, online);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Copy,
    Move,
}

pub(crate) struct FolderInner {
    name: String,
    store: Weak<StoreInner>,
    backend: Box<dyn FolderBackend>,
    summary: Mutex<SummaryIndex>,
}

/// Handle to an open folder.
///
/// Handles are cheap to clone. A folder holds only a weak reference to its
/// store; once the store is dropped every operation fails with
/// [`Error::StoreReleased`].
#[derive(Clone)]
pub struct DiscoFolder {
    inner: Arc<FolderInner>,
}

impl std::fmt::Debug for DiscoFolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoFolder")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl DiscoFolder {
    pub(crate) fn new(
        name: impl Into<String>,
        store: Weak<StoreInner>,
        backend: Box<dyn FolderBackend>,
        summary: SummaryIndex,
    ) -> Self {
        Self {
            inner: Arc::new(FolderInner {
                name: name.into(),
                store,
                backend,
                summary: Mutex::new(summary),
            }),
        }
    }

    pub(crate) const fn from_inner(inner: Arc<FolderInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<FolderInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn backend(&self) -> &dyn FolderBackend {
        self.inner.backend.as_ref()
    }

    pub(crate) async fn summary_mut(&self) -> MutexGuard<'_, SummaryIndex> {
        self.inner.summary.lock().await
    }

    fn upgrade_store(&self) -> Result<Arc<StoreInner>> {
        self.inner.store.upgrade().ok_or(Error::StoreReleased)
    }

    /// Full folder name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// What the folder can contain.
    #[must_use]
    pub fn capabilities(&self) -> FolderCapabilities {
        self.inner.backend.capabilities()
    }

    /// The store this folder was opened from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreReleased`] if the store is gone.
    pub fn store(&self) -> Result<DiscoStore> {
        self.upgrade_store().map(DiscoStore::from_inner)
    }

    /// Snapshot of the folder summary.
    pub async fn summary(&self) -> SummaryIndex {
        self.inner.summary.lock().await.clone()
    }

    /// Cached record for one message.
    pub async fn message_info(&self, uid: &Uid) -> Option<MessageInfo> {
        self.inner.summary.lock().await.get(uid).cloned()
    }

    /// Number of summarized messages.
    pub async fn message_count(&self) -> usize {
        self.inner.summary.lock().await.len()
    }

    /// Re-synchronize the summary against the remote.
    ///
    /// Offline this is a no-op and the cached summary stands.
    ///
    /// # Errors
    ///
    /// Returns the online hook's error unchanged.
    pub async fn refresh_info(&self) -> Result<()> {
        let store = self.upgrade_store()?;
        let (_guard, status) = store.dispatch().await?;

        if status.is_offline() {
            debug!("{}: offline, keeping cached summary", self.name());
            return Ok(());
        }

        let remote = self.inner.backend.refresh_info_online().await?;
        let mut summary = self.inner.summary.lock().await;
        let changes = summary.merge_remote(remote);
        for uid in &changes.removed {
            store.events().row_deleted(self.name(), uid);
        }
        for uid in &changes.changed {
            store.events().row_changed(self.name(), uid);
        }
        debug!(
            "{}: refreshed, {} changed, {} removed",
            self.name(),
            changes.changed.len(),
            changes.removed.len()
        );
        Ok(())
    }

    /// Write the folder back, expunging deleted messages first if asked.
    ///
    /// Online, locally changed flags are pushed to the remote. In both modes
    /// the summary is flushed to the local database.
    ///
    /// # Errors
    ///
    /// Returns the hook's error, or a database error from the flush.
    pub async fn sync(&self, expunge: bool) -> Result<()> {
        let store = self.upgrade_store()?;
        let (_guard, status) = store.dispatch().await?;

        if expunge {
            let uids = self.inner.summary.lock().await.deleted_uids();
            self.expunge_locked(&store, status, &uids).await?;
        }

        let mut summary = self.inner.summary.lock().await;
        match status {
            ConnectivityStatus::Online => {
                let changed = summary.changed_infos();
                self.inner.backend.sync_online(&changed).await?;
                let uids: Vec<Uid> = changed.into_iter().map(|i| i.uid).collect();
                summary.clear_changed(&uids);
            }
            ConnectivityStatus::Offline => self.inner.backend.sync_offline().await?,
        }

        store.storage().summaries().save(&mut summary).await?;
        store
            .events()
            .emit(StoreEvent::FolderUpdated(summary.folder_info()));
        Ok(())
    }

    /// Expunge every message flagged as deleted in the summary.
    ///
    /// # Errors
    ///
    /// See [`DiscoFolder::expunge_uids`].
    pub async fn expunge(&self) -> Result<()> {
        let store = self.upgrade_store()?;
        let (_guard, status) = store.dispatch().await?;
        let uids = self.inner.summary.lock().await.deleted_uids();
        self.expunge_locked(&store, status, &uids).await
    }

    /// Permanently remove the given messages.
    ///
    /// An empty list does nothing. Offline, the exact UID list is diarized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUid`] if any UID is not summarized (nothing is
    /// removed), or the hook's error unchanged.
    pub async fn expunge_uids(&self, uids: &[Uid]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let store = self.upgrade_store()?;
        let (_guard, status) = store.dispatch().await?;
        self.expunge_locked(&store, status, uids).await
    }

    async fn expunge_locked(
        &self,
        store: &StoreInner,
        status: ConnectivityStatus,
        uids: &[Uid],
    ) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        self.inner.summary.lock().await.check_uids(uids)?;

        match status {
            ConnectivityStatus::Online => {
                self.inner.backend.expunge_uids_online(uids).await?;
            }
            ConnectivityStatus::Offline => {
                self.inner.backend.expunge_uids_offline(uids).await?;
                store
                    .storage()
                    .diary()
                    .log(&DiaryEntry::Expunge {
                        folder: self.name().to_string(),
                        uids: uids.to_vec(),
                    })
                    .await?;
            }
        }

        let mut summary = self.inner.summary.lock().await;
        for uid in uids {
            summary.remove(uid);
            store.events().row_deleted(self.name(), uid);
        }
        debug!("{}: expunged {} messages ({status})", self.name(), uids.len());
        Ok(())
    }

    /// Append a message, returning its UID.
    ///
    /// Online the UID comes from the remote; offline it is an offline UID and
    /// the append is diarized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedOperation`] if the folder cannot hold
    /// messages, or the hook's error unchanged.
    pub async fn append_message(&self, message: &Message, flags: Flags) -> Result<Uid> {
        if !self.capabilities().holds_messages {
            return Err(Error::UnsupportedOperation(format!(
                "{} cannot hold messages",
                self.name()
            )));
        }
        let store = self.upgrade_store()?;
        let (_guard, status) = store.dispatch().await?;

        let uid = match status {
            ConnectivityStatus::Online => self.inner.backend.append_online(message, &flags).await?,
            ConnectivityStatus::Offline => {
                let uid = self.inner.backend.append_offline(message, &flags).await?;
                store
                    .storage()
                    .diary()
                    .log(&DiaryEntry::Append {
                        folder: self.name().to_string(),
                        uid: uid.clone(),
                    })
                    .await?;
                uid
            }
        };

        self.inner
            .summary
            .lock()
            .await
            .insert(MessageInfo::from_message(uid.clone(), message, flags));
        store.events().row_changed(self.name(), &uid);
        info!("{}: appended {uid} ({status})", self.name());
        Ok(uid)
    }

    /// Copy messages to another folder of the same store.
    ///
    /// Returns the UID each message received in the destination.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedOperation`] for cross-store or same-folder
    /// transfers, [`Error::InvalidUid`] if any UID is not summarized, or the
    /// hook's error unchanged. Nothing is diarized on failure.
    pub async fn copy_messages_to(
        &self,
        uids: &[Uid],
        destination: &Self,
    ) -> Result<Vec<UidMapping>> {
        self.transfer(uids, destination, Transfer::Copy).await
    }

    /// Move messages to another folder of the same store.
    ///
    /// # Errors
    ///
    /// Same as [`DiscoFolder::copy_messages_to`].
    pub async fn move_messages_to(
        &self,
        uids: &[Uid],
        destination: &Self,
    ) -> Result<Vec<UidMapping>> {
        self.transfer(uids, destination, Transfer::Move).await
    }

    async fn transfer(
        &self,
        uids: &[Uid],
        destination: &Self,
        kind: Transfer,
    ) -> Result<Vec<UidMapping>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        if !Weak::ptr_eq(&self.inner.store, &destination.inner.store) {
            return Err(Error::UnsupportedOperation(format!(
                "cannot transfer from {} to {} across stores",
                self.name(),
                destination.name()
            )));
        }
        if Arc::ptr_eq(&self.inner, &destination.inner) || self.name() == destination.name() {
            return Err(Error::UnsupportedOperation(format!(
                "source and destination are both {}",
                self.name()
            )));
        }
        if !destination.capabilities().holds_messages {
            return Err(Error::UnsupportedOperation(format!(
                "{} cannot hold messages",
                destination.name()
            )));
        }

        let store = self.upgrade_store()?;
        let (_guard, status) = store.dispatch().await?;

        let originals: Vec<MessageInfo> = {
            let summary = self.inner.summary.lock().await;
            summary.check_uids(uids)?;
            uids.iter().filter_map(|uid| summary.get(uid).cloned()).collect()
        };

        let target = destination.backend();
        let backend = &self.inner.backend;
        let mappings = match (status, kind) {
            (ConnectivityStatus::Online, Transfer::Copy) => backend.copy_online(uids, target).await?,
            (ConnectivityStatus::Online, Transfer::Move) => backend.move_online(uids, target).await?,
            (ConnectivityStatus::Offline, Transfer::Copy) => {
                backend.copy_offline(uids, target).await?
            }
            (ConnectivityStatus::Offline, Transfer::Move) => {
                backend.move_offline(uids, target).await?
            }
        };

        if status.is_offline() {
            let destination_uids: Vec<Uid> = uids
                .iter()
                .filter_map(|uid| {
                    mappings
                        .iter()
                        .find(|m| &m.source == uid)
                        .map(|m| m.destination.clone())
                })
                .collect();
            let (source, dest) = (self.name().to_string(), destination.name().to_string());
            let entry = match kind {
                Transfer::Copy => DiaryEntry::Copy {
                    source,
                    destination: dest,
                    uids: uids.to_vec(),
                    destination_uids,
                },
                Transfer::Move => DiaryEntry::Move {
                    source,
                    destination: dest,
                    uids: uids.to_vec(),
                    destination_uids,
                },
            };
            store.storage().diary().log(&entry).await?;
        }

        {
            let mut summary = destination.inner.summary.lock().await;
            for mapping in &mappings {
                if let Some(info) = originals.iter().find(|i| i.uid == mapping.source) {
                    summary.insert(info.with_uid(mapping.destination.clone()));
                    store
                        .events()
                        .row_changed(destination.name(), &mapping.destination);
                }
            }
        }
        if kind == Transfer::Move {
            let mut summary = self.inner.summary.lock().await;
            for uid in uids {
                summary.remove(uid);
                store.events().row_deleted(self.name(), uid);
            }
        }

        debug!(
            "{}: {kind:?} of {} messages to {} ({status})",
            self.name(),
            uids.len(),
            destination.name()
        );
        Ok(mappings)
    }

    /// Merge a flag change into the cached record for `uid`.
    ///
    /// Every flag in `mask` takes its presence from `set`. The change is
    /// pushed to the remote on the next online [`sync`](Self::sync). Returns
    /// whether the flags changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUid`] if `uid` is not summarized.
    pub async fn set_message_flags(&self, uid: &Uid, mask: &Flags, set: &Flags) -> Result<bool> {
        let store = self.upgrade_store()?;
        let _guard = store.lock().await;
        let changed = self.inner.summary.lock().await.set_flags(uid, mask, set)?;
        if changed {
            store.events().row_changed(self.name(), uid);
        }
        Ok(changed)
    }

    /// Retrieve a message body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUid`] if `uid` is not summarized,
    /// [`Error::NotAvailableOffline`] offline when the body was never cached,
    /// or the online hook's error (including [`Error::Cancelled`]).
    pub async fn get_message(&self, uid: &Uid) -> Result<Message> {
        let store = self.upgrade_store()?;
        let (_guard, status) = store.dispatch().await?;
        if !self.inner.summary.lock().await.contains(uid) {
            return Err(Error::invalid_uid(self.name(), uid));
        }
        match status {
            ConnectivityStatus::Online => self.inner.backend.get_message_online(uid).await,
            ConnectivityStatus::Offline => self.inner.backend.get_message_offline(uid).await,
        }
    }

    /// Download every summarized message so the folder is readable offline.
    ///
    /// Offline this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the backend's error unchanged.
    pub async fn prepare_for_offline(&self) -> Result<()> {
        let store = self.upgrade_store()?;
        let (_guard, status) = store.dispatch().await?;
        if status.is_offline() {
            return Ok(());
        }
        self.prepare_locked().await
    }

    pub(crate) async fn prepare_locked(&self) -> Result<()> {
        let uids = self.inner.summary.lock().await.uids();
        self.inner.backend.prepare_for_offline(&uids).await?;
        debug!("{}: prepared {} messages for offline use", self.name(), uids.len());
        Ok(())
    }

    /// Write the summary to the local database if it has unsaved changes.
    pub(crate) async fn flush_locked(&self, store: &StoreInner) -> Result<()> {
        let mut summary = self.inner.summary.lock().await;
        if summary.is_dirty() {
            store.storage().summaries().save(&mut summary).await?;
            store
                .events()
                .emit(StoreEvent::FolderUpdated(summary.folder_info()));
        }
        Ok(())
    }
}
