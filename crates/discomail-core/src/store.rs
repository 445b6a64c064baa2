//! Disconnectable stores.
//!
//! A [`DiscoStore`] owns the connectivity status of one remote message store
//! and routes every store and folder operation to the matching online or
//! offline hook of a [`StoreBackend`].
//!
//! All dispatch goes through a per-store `tokio::sync::Mutex`. The status is
//! read and the hook runs while that lock is held, so a status change can
//! never land between the two. Status transitions, including the diary replay
//! that follows a switch to online, happen under the same lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard, broadcast};
use tracing::{debug, info, warn};

use crate::config::{DiscoConfig, ReplayFailurePolicy};
use crate::diary::Diary;
use crate::events::{EventBus, StoreEvent};
use crate::folder::{DiscoFolder, FolderBackend, FolderInner};
use crate::replay::{ReplayExecutor, ReplayReport, Replayer, TransferItem};
use crate::status::{ConnectivityStatus, StatusCell};
use crate::storage::LocalStorage;
use crate::summary::SummaryIndex;
use crate::types::{Flags, FolderInfo, FolderInfoFlags, GetFolderFlags, Uid, UidMapping};
use crate::{Error, Result};

/// Online and offline implementations of the store operations.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Open the underlying transport.
    async fn connect_transport(&self) -> Result<()>;

    /// Close the underlying transport.
    async fn disconnect_transport(&self, clean: bool) -> Result<()>;

    /// Bring the online session up once the transport is open.
    async fn connect_online(&self) -> Result<()>;

    /// Open the local cache. Must succeed without network access.
    async fn connect_offline(&self) -> Result<()>;

    /// Tear down the online session.
    async fn disconnect_online(&self, clean: bool) -> Result<()>;

    /// Close the local cache.
    async fn disconnect_offline(&self, clean: bool) -> Result<()>;

    /// Look up a folder on the remote.
    async fn get_folder_online(
        &self,
        name: &str,
        flags: GetFolderFlags,
    ) -> Result<Box<dyn FolderBackend>>;

    /// Open a folder from the local cache.
    async fn get_folder_offline(
        &self,
        name: &str,
        flags: GetFolderFlags,
    ) -> Result<Box<dyn FolderBackend>>;

    /// List folders on the remote.
    async fn get_folder_info_online(
        &self,
        top: &str,
        flags: FolderInfoFlags,
    ) -> Result<Vec<FolderInfo>>;

    /// List folders from the local cache.
    async fn get_folder_info_offline(
        &self,
        top: &str,
        flags: FolderInfoFlags,
    ) -> Result<Vec<FolderInfo>>;

    /// Whether the store has a subscription model.
    fn uses_subscriptions(&self) -> bool {
        false
    }

    /// Subscribe to a folder on the remote.
    async fn subscribe_online(&self, name: &str) -> Result<()> {
        Err(Error::UnsupportedOperation(format!(
            "cannot subscribe to {name}: store has no subscriptions"
        )))
    }

    /// Unsubscribe from a folder on the remote.
    async fn unsubscribe_online(&self, name: &str) -> Result<()> {
        Err(Error::UnsupportedOperation(format!(
            "cannot unsubscribe from {name}: store has no subscriptions"
        )))
    }
}

/// State guarded by the dispatch lock.
#[derive(Default)]
pub(crate) struct DispatchState {
    connected: bool,
    /// Set once a replay run has followed the last offline period.
    replayed: bool,
    folders: HashMap<String, Weak<FolderInner>>,
}

impl DispatchState {
    fn open_folder(&self, name: &str) -> Option<DiscoFolder> {
        self.folders
            .get(name)
            .and_then(Weak::upgrade)
            .map(DiscoFolder::from_inner)
    }

    fn open_folders(&mut self) -> Vec<DiscoFolder> {
        self.folders.retain(|_, folder| folder.strong_count() > 0);
        self.folders
            .values()
            .filter_map(Weak::upgrade)
            .map(DiscoFolder::from_inner)
            .collect()
    }
}

pub(crate) struct StoreInner {
    url: String,
    backend: Box<dyn StoreBackend>,
    storage: LocalStorage,
    status: StatusCell,
    resyncing: AtomicBool,
    state: Mutex<DispatchState>,
    events: EventBus,
    replay_failures: ReplayFailurePolicy,
    prepare_on_offline: bool,
}

impl StoreInner {
    pub(crate) async fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().await
    }

    pub(crate) fn status(&self) -> ConnectivityStatus {
        self.status.get()
    }

    /// Take the lock for an operation and read the status under it.
    ///
    /// Online operations are refused while diary entries logged offline are
    /// still waiting for a replay, so they can never overtake them.
    pub(crate) async fn dispatch(
        &self,
    ) -> Result<(MutexGuard<'_, DispatchState>, ConnectivityStatus)> {
        let mut state = self.lock().await;
        let status = self.status();
        if status.is_online() && !state.replayed {
            let pending = self.storage.diary().len().await?;
            if pending > 0 {
                return Err(Error::ServiceUnavailable(format!(
                    "{}: {pending} offline operations are waiting for replay; connect first",
                    self.url
                )));
            }
            state.replayed = true;
        }
        Ok((state, status))
    }

    pub(crate) const fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub(crate) const fn events(&self) -> &EventBus {
        &self.events
    }

    fn publish_status(&self, status: ConnectivityStatus) {
        self.status.set(status);
        self.events.emit(StoreEvent::StatusChanged { status });
        info!("{}: now {status}", self.url);
    }

    /// Replay the diary through the online hooks. Caller holds the lock.
    async fn resync(&self, state: &mut DispatchState) -> Result<ReplayReport> {
        self.resyncing.store(true, Ordering::Release);
        let mut executor = OnlineExecutor {
            store: self,
            state: &mut *state,
        };
        let result = Replayer::new(self.replay_failures)
            .replay(self.storage.diary(), &mut executor)
            .await;
        self.resyncing.store(false, Ordering::Release);

        let report = result?;
        state.replayed = true;
        for failure in &report.failures {
            self.events.emit(StoreEvent::ReplayFailed(failure.clone()));
        }
        Ok(report)
    }

    /// Record a folder seen online, announcing it if it is new.
    async fn register(&self, info: &FolderInfo) -> Result<()> {
        if self.storage.summaries().register_folder(info).await? {
            debug!("{}: new folder {}", self.url, info.full_name);
            self.events.emit(StoreEvent::FolderCreated(info.clone()));
        }
        Ok(())
    }
}

/// A remote message store that keeps working while disconnected.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct DiscoStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for DiscoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoStore")
            .field("url", &self.inner.url)
            .field("status", &self.inner.status())
            .finish_non_exhaustive()
    }
}

impl DiscoStore {
    /// Open a store whose local database lives under the configured data
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the local database cannot be opened.
    pub async fn open(
        url: impl Into<String>,
        backend: Box<dyn StoreBackend>,
        config: &DiscoConfig,
    ) -> Result<Self> {
        let url = url.into();
        let storage = LocalStorage::open(&config.database_path(&url)).await?;
        Ok(Self::new(url, backend, storage, config))
    }

    /// Create a store on already opened local storage.
    ///
    /// The initial status comes from [`DiscoConfig::initial_status`].
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        backend: Box<dyn StoreBackend>,
        storage: LocalStorage,
        config: &DiscoConfig,
    ) -> Self {
        let url = url.into();
        let status = config.initial_status();
        debug!("{url}: created ({status})");
        Self {
            inner: Arc::new(StoreInner {
                url,
                backend,
                storage,
                status: StatusCell::new(status),
                resyncing: AtomicBool::new(false),
                state: Mutex::new(DispatchState::default()),
                events: EventBus::new(config.event_capacity),
                replay_failures: config.replay_failures,
                prepare_on_offline: config.prepare_on_offline,
            }),
        }
    }

    pub(crate) const fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    /// Store URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current connectivity status. Never blocks.
    #[must_use]
    pub fn status(&self) -> ConnectivityStatus {
        self.inner.status()
    }

    /// Returns true while the diary is being replayed.
    #[must_use]
    pub fn is_resyncing(&self) -> bool {
        self.inner.resyncing.load(Ordering::Acquire)
    }

    /// Fail unless the store is online.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] when offline.
    pub fn check_online(&self) -> Result<()> {
        if self.status().is_offline() {
            return Err(Error::ServiceUnavailable(format!(
                "{} is offline; this operation requires a connection",
                self.inner.url
            )));
        }
        Ok(())
    }

    /// Subscribe to store and folder events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// The operation diary.
    #[must_use]
    pub fn diary(&self) -> &Diary {
        self.inner.storage.diary()
    }

    /// Local database backing this store.
    #[must_use]
    pub fn storage(&self) -> &LocalStorage {
        &self.inner.storage
    }

    /// Connect the transport, then run the status-specific connect hook.
    ///
    /// Connecting online with a non-empty diary replays it before returning.
    /// Connecting an already connected store does nothing.
    ///
    /// # Errors
    ///
    /// Returns the transport or hook error. If the hook fails the transport is
    /// closed again.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        if state.connected {
            return Ok(());
        }

        self.inner.backend.connect_transport().await?;
        let status = self.status();
        let connected = match status {
            ConnectivityStatus::Online => self.inner.backend.connect_online().await,
            ConnectivityStatus::Offline => self.inner.backend.connect_offline().await,
        };
        if let Err(e) = connected {
            if let Err(close) = self.inner.backend.disconnect_transport(false).await {
                warn!("{}: closing transport after failed connect: {close}", self.url());
            }
            return Err(e);
        }
        state.connected = true;
        info!("{}: connected ({status})", self.url());

        if status.is_online() && !self.inner.storage.diary().is_empty().await? {
            self.inner.resync(&mut state).await?;
        }
        Ok(())
    }

    /// Run the status-specific disconnect hook, then close the transport.
    ///
    /// Open folder summaries are flushed first. If the hook fails the error is
    /// returned and the transport is left open.
    ///
    /// # Errors
    ///
    /// Returns the hook or transport error.
    pub async fn disconnect(&self, clean: bool) -> Result<()> {
        let mut state = self.inner.lock().await;
        if !state.connected {
            return Ok(());
        }

        for folder in state.open_folders() {
            folder.flush_locked(&self.inner).await?;
        }

        match self.status() {
            ConnectivityStatus::Online => self.inner.backend.disconnect_online(clean).await?,
            ConnectivityStatus::Offline => self.inner.backend.disconnect_offline(clean).await?,
        }
        self.inner.backend.disconnect_transport(clean).await?;
        state.connected = false;
        info!("{}: disconnected", self.url());
        Ok(())
    }

    /// Returns true if the transport is connected.
    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    /// Switch connectivity status.
    ///
    /// Going offline prepares open folders when configured to, flushes their
    /// summaries and swaps the online session for the local cache. Going
    /// online swaps back and replays the diary before any other operation can
    /// run. Replay failures do not fail this call; they are reported as
    /// [`StoreEvent::ReplayFailed`]. A store that is not connected only
    /// changes status; online operations then wait for [`connect`](Self::connect)
    /// to replay any pending diary entries.
    ///
    /// # Errors
    ///
    /// Returns a hook error or a local database error. If the new session
    /// fails to connect the old one is restored and the status is unchanged.
    pub async fn set_status(&self, status: ConnectivityStatus) -> Result<()> {
        let mut state = self.inner.lock().await;
        if self.status() == status {
            return Ok(());
        }

        match status {
            ConnectivityStatus::Offline => {
                let open = state.open_folders();
                if self.inner.prepare_on_offline {
                    for folder in &open {
                        if let Err(e) = folder.prepare_locked().await {
                            warn!("{}: could not prepare for offline: {e}", folder.name());
                        }
                    }
                }
                for folder in &open {
                    folder.flush_locked(&self.inner).await?;
                }
                if state.connected {
                    self.inner.backend.disconnect_online(true).await?;
                    if let Err(e) = self.inner.backend.connect_offline().await {
                        self.restore_session(ConnectivityStatus::Online).await;
                        return Err(e);
                    }
                }
                state.replayed = false;
                self.inner.publish_status(ConnectivityStatus::Offline);
            }
            ConnectivityStatus::Online => {
                if state.connected {
                    self.inner.backend.disconnect_offline(true).await?;
                    if let Err(e) = self.inner.backend.connect_online().await {
                        self.restore_session(ConnectivityStatus::Offline).await;
                        return Err(e);
                    }
                }
                self.inner.publish_status(ConnectivityStatus::Online);
                if state.connected {
                    self.inner.resync(&mut state).await?;
                }
            }
        }
        Ok(())
    }

    /// Bring back the session of `status` after the other one failed to
    /// connect. The status is left unchanged either way.
    async fn restore_session(&self, status: ConnectivityStatus) {
        let restored = match status {
            ConnectivityStatus::Online => self.inner.backend.connect_online().await,
            ConnectivityStatus::Offline => self.inner.backend.connect_offline().await,
        };
        if let Err(e) = restored {
            warn!("{}: could not restore the {status} session: {e}", self.url());
        }
    }

    /// Replay the diary now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] when offline,
    /// [`Error::ConnectionFailed`] when not connected, or a local database
    /// error. Entry failures are reported in the returned report.
    pub async fn resync(&self) -> Result<ReplayReport> {
        let mut state = self.inner.lock().await;
        self.check_online()?;
        if !state.connected {
            return Err(Error::ConnectionFailed(format!(
                "{} is not connected",
                self.url()
            )));
        }
        self.inner.resync(&mut state).await
    }

    /// Open a folder.
    ///
    /// Online the folder is looked up on the remote and recorded locally.
    /// Offline only folders recorded while online can be opened. An already
    /// open folder is returned without running a hook.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAvailableOffline`] for a folder never seen online,
    /// or the hook's error unchanged.
    pub async fn get_folder(&self, name: &str, flags: GetFolderFlags) -> Result<DiscoFolder> {
        let (mut state, status) = self.inner.dispatch().await?;
        state.folders.retain(|_, folder| folder.strong_count() > 0);
        if let Some(folder) = state.open_folder(name) {
            return Ok(folder);
        }

        let summaries = self.inner.storage.summaries();
        let backend = match status {
            ConnectivityStatus::Online => {
                let backend = self.inner.backend.get_folder_online(name, flags).await?;
                let mut info = summaries
                    .registered_folder(name)
                    .await?
                    .unwrap_or_else(|| FolderInfo::new(name));
                let capabilities = backend.capabilities();
                info.holds_messages = capabilities.holds_messages;
                info.holds_folders = capabilities.holds_folders;
                self.inner.register(&info).await?;
                backend
            }
            ConnectivityStatus::Offline => {
                if !summaries.is_registered(name).await? {
                    return Err(Error::NotAvailableOffline(format!(
                        "folder {name} was never opened online"
                    )));
                }
                self.inner.backend.get_folder_offline(name, flags).await?
            }
        };

        let summary = summaries.load(name).await?;
        let folder = DiscoFolder::new(name, Arc::downgrade(&self.inner), backend, summary);
        state.folders.insert(name.to_string(), folder.downgrade());
        debug!("{}: opened {name} ({status})", self.url());
        Ok(folder)
    }

    /// List folders below `top` (the empty string is the root).
    ///
    /// Online, listed folders are recorded locally; a full recursive listing
    /// from the root also forgets folders the remote no longer reports.
    ///
    /// # Errors
    ///
    /// Offline, a request for unfiltered folder info on a store with
    /// subscriptions fails with [`Error::ServiceUnavailable`]. Otherwise the
    /// hook's error is returned unchanged.
    pub async fn get_folder_info(
        &self,
        top: &str,
        flags: FolderInfoFlags,
    ) -> Result<Vec<FolderInfo>> {
        let (_guard, status) = self.inner.dispatch().await?;

        match status {
            ConnectivityStatus::Online => {
                let infos = self.inner.backend.get_folder_info_online(top, flags).await?;
                for info in &infos {
                    self.inner.register(info).await?;
                }
                if top.is_empty() && flags.recursive && !flags.subscribed_only {
                    let summaries = self.inner.storage.summaries();
                    for known in summaries.registered_folders().await? {
                        if !infos.iter().any(|i| i.full_name == known.full_name) {
                            summaries.remove_folder(&known.full_name).await?;
                            debug!("{}: folder {} is gone", self.url(), known.full_name);
                            self.inner.events.emit(StoreEvent::FolderRemoved {
                                folder: known.full_name,
                            });
                        }
                    }
                }
                Ok(infos)
            }
            ConnectivityStatus::Offline => {
                if !flags.subscribed_only && self.inner.backend.uses_subscriptions() {
                    return Err(Error::ServiceUnavailable(format!(
                        "{}: listing unsubscribed folders requires a connection",
                        self.url()
                    )));
                }
                self.inner.backend.get_folder_info_offline(top, flags).await
            }
        }
    }

    /// Subscribe to a folder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] when offline, or the hook's
    /// error.
    pub async fn subscribe_folder(&self, name: &str) -> Result<()> {
        let (_guard, _) = self.inner.dispatch().await?;
        self.check_online()?;
        self.inner.backend.subscribe_online(name).await?;
        self.set_registered_subscription(name, true).await
    }

    /// Unsubscribe from a folder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] when offline, or the hook's
    /// error.
    pub async fn unsubscribe_folder(&self, name: &str) -> Result<()> {
        let (_guard, _) = self.inner.dispatch().await?;
        self.check_online()?;
        self.inner.backend.unsubscribe_online(name).await?;
        self.set_registered_subscription(name, false).await
    }

    async fn set_registered_subscription(&self, name: &str, subscribed: bool) -> Result<()> {
        let summaries = self.inner.storage.summaries();
        if let Some(mut info) = summaries.registered_folder(name).await? {
            info.subscribed = subscribed;
            summaries.register_folder(&info).await?;
            self.inner.events.emit(StoreEvent::FolderUpdated(info));
        }
        Ok(())
    }
}

/// Folder resolved for replay: an open handle or a transient backend.
enum ReplayTarget {
    Open(DiscoFolder),
    Closed(Box<dyn FolderBackend>),
}

impl ReplayTarget {
    fn backend(&self) -> &dyn FolderBackend {
        match self {
            Self::Open(folder) => folder.backend(),
            Self::Closed(backend) => backend.as_ref(),
        }
    }
}

/// Runs diary entries through the online hooks while the lock is held.
struct OnlineExecutor<'a> {
    store: &'a StoreInner,
    state: &'a mut DispatchState,
}

impl OnlineExecutor<'_> {
    async fn target(&self, folder: &str) -> Result<ReplayTarget> {
        if let Some(open) = self.state.open_folder(folder) {
            return Ok(ReplayTarget::Open(open));
        }
        let backend = self
            .store
            .backend
            .get_folder_online(folder, GetFolderFlags::default())
            .await?;
        Ok(ReplayTarget::Closed(backend))
    }

    async fn cached_flags(&self, target: &ReplayTarget, folder: &str, uid: &Uid) -> Result<Flags> {
        let flags = match target {
            ReplayTarget::Open(open) => open.summary_mut().await.get(uid).map(|i| i.flags.clone()),
            ReplayTarget::Closed(_) => self
                .store
                .storage
                .summaries()
                .load(folder)
                .await?
                .get(uid)
                .map(|i| i.flags.clone()),
        };
        Ok(flags.unwrap_or_default())
    }

    /// Re-key summary records and cached bodies from offline UIDs to the UIDs
    /// the remote assigned, and flush the summary.
    async fn rename(&self, target: &ReplayTarget, folder: &str, renames: &[UidMapping]) -> Result<()> {
        if renames.is_empty() {
            return Ok(());
        }
        for mapping in renames {
            if let Err(e) = target
                .backend()
                .resolve_offline_uid(&mapping.source, &mapping.destination)
                .await
            {
                warn!("{folder}: keeping cached {}: {e}", mapping.source);
            }
        }
        let summaries = self.store.storage.summaries();
        let apply = |summary: &mut SummaryIndex| {
            for mapping in renames {
                if summary.rename(&mapping.source, mapping.destination.clone()) {
                    self.store.events.row_deleted(folder, &mapping.source);
                    self.store.events.row_changed(folder, &mapping.destination);
                }
            }
        };
        match target {
            ReplayTarget::Open(open) => {
                let mut summary = open.summary_mut().await;
                apply(&mut *summary);
                summaries.save(&mut summary).await
            }
            ReplayTarget::Closed(_) => {
                let mut summary = summaries.load(folder).await?;
                apply(&mut summary);
                summaries.save(&mut summary).await
            }
        }
    }
}

#[async_trait]
impl ReplayExecutor for OnlineExecutor<'_> {
    async fn replay_append(&mut self, folder: &str, uid: &Uid) -> Result<Option<Uid>> {
        let target = self.target(folder).await?;
        let message = match target.backend().get_message_offline(uid).await {
            Ok(message) => message,
            Err(Error::NotAvailableOffline(_)) => {
                debug!("{folder}/{uid} is no longer cached, nothing to upload");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let flags = self.cached_flags(&target, folder, uid).await?;
        let online = target.backend().append_online(&message, &flags).await?;
        self.rename(
            &target,
            folder,
            &[UidMapping::new(uid.clone(), online.clone())],
        )
        .await?;
        debug!("Replayed append {folder}/{uid} as {online}");
        Ok(Some(online))
    }

    async fn replay_expunge(&mut self, folder: &str, uids: &[Uid]) -> Result<()> {
        let target = self.target(folder).await?;
        target.backend().expunge_uids_online(uids).await
    }

    async fn replay_transfer(
        &mut self,
        source: &str,
        destination: &str,
        items: &[TransferItem],
        delete_originals: bool,
    ) -> Result<Vec<UidMapping>> {
        let from = self.target(source).await?;
        let to = self.target(destination).await?;
        let uids: Vec<Uid> = items.iter().map(|item| item.source.clone()).collect();

        let mappings = if delete_originals {
            from.backend().move_online(&uids, to.backend()).await?
        } else {
            from.backend().copy_online(&uids, to.backend()).await?
        };

        let resolved: Vec<UidMapping> = items
            .iter()
            .filter_map(|item| {
                let offline = item.offline_destination.as_ref()?;
                let mapping = mappings.iter().find(|m| m.source == item.source)?;
                Some(UidMapping::new(offline.clone(), mapping.destination.clone()))
            })
            .collect();
        self.rename(&to, destination, &resolved).await?;
        Ok(resolved)
    }
}
