//! In-memory backend.
//!
//! [`MemoryRemote`] simulates a remote message store: folders, UID counters,
//! subscriptions, plus switches to make it unreachable, cancel the next
//! online operation or fail a named hook once. [`MemoryCache`] is the local
//! side: cached message bodies and the offline UID counter.
//!
//! Every hook invocation is appended to the remote's call log as
//! `"<hook> <details>"`, so tests can assert exactly which path ran.
//! Batch hooks check every UID before touching anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::folder::FolderBackend;
use crate::store::StoreBackend;
use crate::summary::MessageInfo;
use crate::types::{
    Flag, Flags, FolderInfo, FolderInfoFlags, GetFolderFlags, Message, Uid, UidMapping,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
struct RemoteFolder {
    next_uid: u32,
    messages: BTreeMap<u32, (Message, Flags)>,
    subscribed: bool,
}

impl RemoteFolder {
    fn info(&self, name: &str, fast: bool) -> FolderInfo {
        let mut info = FolderInfo::new(name);
        info.subscribed = self.subscribed;
        if !fast {
            info.total = u32::try_from(self.messages.len()).ok();
            info.unread =
                u32::try_from(self.messages.values().filter(|(_, f)| !f.is_seen()).count()).ok();
        }
        info
    }
}

#[derive(Debug)]
struct RemoteState {
    reachable: bool,
    transport_open: bool,
    cancel_next: bool,
    fail_next: Option<String>,
    folders: BTreeMap<String, RemoteFolder>,
    calls: Vec<String>,
}

impl Default for RemoteState {
    fn default() -> Self {
        Self {
            reachable: true,
            transport_open: false,
            cancel_next: false,
            fail_next: None,
            folders: BTreeMap::new(),
            calls: Vec::new(),
        }
    }
}

impl RemoteState {
    /// Log a hook call and apply injected failures. Online hooks also need
    /// the remote to be reachable.
    fn enter(&mut self, hook: &str, details: &str, online: bool) -> Result<()> {
        if details.is_empty() {
            self.calls.push(hook.to_string());
        } else {
            self.calls.push(format!("{hook} {details}"));
        }

        if self.fail_next.as_deref() == Some(hook) {
            self.fail_next = None;
            return Err(Error::ConnectionFailed(format!("{hook}: injected failure")));
        }
        if online {
            if !self.reachable {
                return Err(Error::ConnectionFailed(format!("{hook}: remote unreachable")));
            }
            if std::mem::take(&mut self.cancel_next) {
                return Err(Error::Cancelled);
            }
        }
        Ok(())
    }

    fn folder(&self, name: &str) -> Result<&RemoteFolder> {
        self.folders
            .get(name)
            .ok_or_else(|| Error::NoSuchFolder(name.to_string()))
    }

    fn folder_mut(&mut self, name: &str) -> Result<&mut RemoteFolder> {
        self.folders
            .get_mut(name)
            .ok_or_else(|| Error::NoSuchFolder(name.to_string()))
    }
}

/// Simulated remote message store.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    /// Creates an empty, reachable remote.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a folder.
    pub async fn add_folder(&self, name: &str) {
        self.state
            .lock()
            .await
            .folders
            .entry(name.to_string())
            .or_default();
    }

    /// Store a message directly on the remote, creating the folder if needed.
    pub async fn seed(&self, folder: &str, message: Message, flags: Flags) -> Uid {
        let mut state = self.state.lock().await;
        let folder = state.folders.entry(folder.to_string()).or_default();
        folder.next_uid += 1;
        folder.messages.insert(folder.next_uid, (message, flags));
        Uid::from(folder.next_uid)
    }

    /// Make online hooks fail with [`Error::ConnectionFailed`].
    pub async fn set_reachable(&self, reachable: bool) {
        self.state.lock().await.reachable = reachable;
    }

    /// Make the next online hook fail with [`Error::Cancelled`].
    pub async fn cancel_next(&self) {
        self.state.lock().await.cancel_next = true;
    }

    /// Make the next call of `hook` fail with [`Error::ConnectionFailed`].
    pub async fn fail_next(&self, hook: &str) {
        self.state.lock().await.fail_next = Some(hook.to_string());
    }

    /// Every hook call so far.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// Return and clear the call log.
    pub async fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().await.calls)
    }

    /// Whether the transport is open.
    pub async fn is_transport_open(&self) -> bool {
        self.state.lock().await.transport_open
    }

    /// Whether a folder exists.
    pub async fn has_folder(&self, name: &str) -> bool {
        self.state.lock().await.folders.contains_key(name)
    }

    /// UIDs stored in a folder.
    pub async fn uids(&self, folder: &str) -> Vec<Uid> {
        self.state
            .lock()
            .await
            .folders
            .get(folder)
            .map(|f| f.messages.keys().map(|n| Uid::from(*n)).collect())
            .unwrap_or_default()
    }

    /// A stored message.
    pub async fn message(&self, folder: &str, uid: &Uid) -> Option<Message> {
        let n = uid.as_str().parse::<u32>().ok()?;
        let state = self.state.lock().await;
        state
            .folders
            .get(folder)?
            .messages
            .get(&n)
            .map(|(m, _)| m.clone())
    }

    /// Flags of a stored message.
    pub async fn flags(&self, folder: &str, uid: &Uid) -> Option<Flags> {
        let n = uid.as_str().parse::<u32>().ok()?;
        let state = self.state.lock().await;
        state
            .folders
            .get(folder)?
            .messages
            .get(&n)
            .map(|(_, f)| f.clone())
    }

    /// Whether a folder is subscribed.
    pub async fn is_subscribed(&self, folder: &str) -> bool {
        self.state
            .lock()
            .await
            .folders
            .get(folder)
            .is_some_and(|f| f.subscribed)
    }
}

#[derive(Debug, Clone)]
struct LocalFolder {
    info: FolderInfo,
    bodies: BTreeMap<Uid, Message>,
}

impl LocalFolder {
    fn new(name: &str) -> Self {
        Self {
            info: FolderInfo::new(name),
            bodies: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    folders: BTreeMap<String, LocalFolder>,
    next_offline: u64,
}

impl CacheState {
    fn folder_mut(&mut self, name: &str) -> &mut LocalFolder {
        self.folders
            .entry(name.to_string())
            .or_insert_with(|| LocalFolder::new(name))
    }

    fn next_offline_uid(&mut self) -> Uid {
        self.next_offline += 1;
        Uid::offline(self.next_offline)
    }

    fn store_body(&mut self, folder: &str, uid: Uid, message: Message) {
        self.folder_mut(folder).bodies.insert(uid, message);
    }

    /// Mirror a transfer in the cache for every body that is cached.
    fn transfer(&mut self, source: &str, destination: &str, mappings: &[UidMapping], delete: bool) {
        for mapping in mappings {
            let body = if delete {
                self.folder_mut(source).bodies.remove(&mapping.source)
            } else {
                self.folder_mut(source).bodies.get(&mapping.source).cloned()
            };
            if let Some(body) = body {
                self.store_body(destination, mapping.destination.clone(), body);
            }
        }
    }
}

/// Local cache of an in-memory store.
///
/// Clones share state, so a cache can outlive the store using it, the way
/// an on-disk cache survives a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    state: Arc<Mutex<CacheState>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a message body is cached.
    pub async fn has_body(&self, folder: &str, uid: &Uid) -> bool {
        self.state
            .lock()
            .await
            .folders
            .get(folder)
            .is_some_and(|f| f.bodies.contains_key(uid))
    }
}

fn listed(full_name: &str, top: &str, recursive: bool) -> bool {
    let parent = full_name.rsplit_once('/').map_or("", |(parent, _)| parent);
    if recursive {
        FolderInfo::new(full_name).is_under(top)
    } else {
        full_name == top || parent == top
    }
}

fn remote_uid(folder: &str, uid: &Uid) -> Result<u32> {
    uid.as_str()
        .parse()
        .map_err(|_| Error::invalid_uid(folder, uid))
}

fn join(uids: &[Uid]) -> String {
    uids.iter().map(Uid::as_str).collect::<Vec<_>>().join(",")
}

/// Store backed by a [`MemoryRemote`] and a [`MemoryCache`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    remote: MemoryRemote,
    cache: MemoryCache,
    subscriptions: bool,
}

impl MemoryStore {
    /// Creates a store with an empty cache.
    #[must_use]
    pub fn new(remote: MemoryRemote) -> Self {
        Self::with_cache(remote, MemoryCache::new())
    }

    /// Creates a store on an existing cache.
    #[must_use]
    pub const fn with_cache(remote: MemoryRemote, cache: MemoryCache) -> Self {
        Self {
            remote,
            cache,
            subscriptions: false,
        }
    }

    /// Give the store a subscription model.
    #[must_use]
    pub const fn with_subscriptions(mut self) -> Self {
        self.subscriptions = true;
        self
    }

    /// The local cache.
    #[must_use]
    pub fn cache(&self) -> MemoryCache {
        self.cache.clone()
    }

    fn folder(&self, name: &str) -> Box<dyn FolderBackend> {
        Box::new(MemoryFolder {
            name: name.to_string(),
            remote: self.remote.clone(),
            cache: self.cache.clone(),
        })
    }

    async fn set_subscribed(&self, name: &str, subscribed: bool) -> Result<()> {
        let hook = if subscribed {
            "subscribe_online"
        } else {
            "unsubscribe_online"
        };
        let mut remote = self.remote.state.lock().await;
        remote.enter(hook, name, true)?;
        remote.folder_mut(name)?.subscribed = subscribed;
        self.cache
            .state
            .lock()
            .await
            .folder_mut(name)
            .info
            .subscribed = subscribed;
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn connect_transport(&self) -> Result<()> {
        let mut remote = self.remote.state.lock().await;
        remote.enter("connect_transport", "", false)?;
        remote.transport_open = true;
        Ok(())
    }

    async fn disconnect_transport(&self, clean: bool) -> Result<()> {
        let mut remote = self.remote.state.lock().await;
        remote.enter("disconnect_transport", if clean { "clean" } else { "" }, false)?;
        remote.transport_open = false;
        Ok(())
    }

    async fn connect_online(&self) -> Result<()> {
        self.remote
            .state
            .lock()
            .await
            .enter("connect_online", "", true)
    }

    async fn connect_offline(&self) -> Result<()> {
        self.remote
            .state
            .lock()
            .await
            .enter("connect_offline", "", false)
    }

    async fn disconnect_online(&self, clean: bool) -> Result<()> {
        self.remote.state.lock().await.enter(
            "disconnect_online",
            if clean { "clean" } else { "" },
            false,
        )
    }

    async fn disconnect_offline(&self, clean: bool) -> Result<()> {
        self.remote.state.lock().await.enter(
            "disconnect_offline",
            if clean { "clean" } else { "" },
            false,
        )
    }

    async fn get_folder_online(
        &self,
        name: &str,
        flags: GetFolderFlags,
    ) -> Result<Box<dyn FolderBackend>> {
        let mut remote = self.remote.state.lock().await;
        remote.enter("get_folder_online", name, true)?;
        if !remote.folders.contains_key(name) {
            if !flags.create {
                return Err(Error::NoSuchFolder(name.to_string()));
            }
            debug!("Creating remote folder {name}");
            remote.folders.insert(name.to_string(), RemoteFolder::default());
        }
        let info = remote.folder(name)?.info(name, true);
        self.cache.state.lock().await.folder_mut(name).info = info;
        Ok(self.folder(name))
    }

    async fn get_folder_offline(
        &self,
        name: &str,
        flags: GetFolderFlags,
    ) -> Result<Box<dyn FolderBackend>> {
        self.remote
            .state
            .lock()
            .await
            .enter("get_folder_offline", name, false)?;
        let mut cache = self.cache.state.lock().await;
        if !cache.folders.contains_key(name) && flags.create {
            return Err(Error::UnsupportedOperation(format!(
                "cannot create {name} while offline"
            )));
        }
        cache.folder_mut(name);
        Ok(self.folder(name))
    }

    async fn get_folder_info_online(
        &self,
        top: &str,
        flags: FolderInfoFlags,
    ) -> Result<Vec<FolderInfo>> {
        let mut remote = self.remote.state.lock().await;
        remote.enter("get_folder_info_online", top, true)?;
        let infos: Vec<FolderInfo> = remote
            .folders
            .iter()
            .filter(|(name, folder)| {
                listed(name, top, flags.recursive) && (!flags.subscribed_only || folder.subscribed)
            })
            .map(|(name, folder)| folder.info(name, flags.fast))
            .collect();

        let mut cache = self.cache.state.lock().await;
        for info in &infos {
            cache.folder_mut(&info.full_name).info = info.clone();
        }
        Ok(infos)
    }

    async fn get_folder_info_offline(
        &self,
        top: &str,
        flags: FolderInfoFlags,
    ) -> Result<Vec<FolderInfo>> {
        self.remote
            .state
            .lock()
            .await
            .enter("get_folder_info_offline", top, false)?;
        let cache = self.cache.state.lock().await;
        Ok(cache
            .folders
            .iter()
            .filter(|(name, folder)| {
                listed(name, top, flags.recursive)
                    && (!flags.subscribed_only || folder.info.subscribed)
            })
            .map(|(_, folder)| folder.info.clone())
            .collect())
    }

    fn uses_subscriptions(&self) -> bool {
        self.subscriptions
    }

    async fn subscribe_online(&self, name: &str) -> Result<()> {
        self.set_subscribed(name, true).await
    }

    async fn unsubscribe_online(&self, name: &str) -> Result<()> {
        self.set_subscribed(name, false).await
    }
}

/// Folder of a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryFolder {
    name: String,
    remote: MemoryRemote,
    cache: MemoryCache,
}

impl MemoryFolder {
    async fn transfer_online(
        &self,
        uids: &[Uid],
        destination: &dyn FolderBackend,
        delete: bool,
    ) -> Result<Vec<UidMapping>> {
        let hook = if delete { "move_online" } else { "copy_online" };
        let details = format!("{} -> {} {}", self.name, destination.name(), join(uids));
        let mut remote = self.remote.state.lock().await;
        remote.enter(hook, &details, true)?;

        let source = remote.folder(&self.name)?;
        let mut picked = Vec::with_capacity(uids.len());
        for uid in uids {
            let n = remote_uid(&self.name, uid)?;
            let entry = source
                .messages
                .get(&n)
                .ok_or_else(|| Error::invalid_uid(&self.name, uid))?;
            picked.push((uid.clone(), n, entry.clone()));
        }

        let target = remote.folder_mut(destination.name())?;
        let mut mappings = Vec::with_capacity(picked.len());
        for (uid, _, entry) in &picked {
            target.next_uid += 1;
            target.messages.insert(target.next_uid, entry.clone());
            mappings.push(UidMapping::new(uid.clone(), Uid::from(target.next_uid)));
        }
        if delete {
            let source = remote.folder_mut(&self.name)?;
            for (_, n, _) in &picked {
                source.messages.remove(n);
            }
        }

        self.cache
            .state
            .lock()
            .await
            .transfer(&self.name, destination.name(), &mappings, delete);
        Ok(mappings)
    }

    async fn transfer_offline(
        &self,
        uids: &[Uid],
        destination: &dyn FolderBackend,
        delete: bool,
    ) -> Result<Vec<UidMapping>> {
        let hook = if delete { "move_offline" } else { "copy_offline" };
        let details = format!("{} -> {} {}", self.name, destination.name(), join(uids));
        self.remote
            .state
            .lock()
            .await
            .enter(hook, &details, false)?;

        let mut cache = self.cache.state.lock().await;
        let source = cache.folder_mut(&self.name);
        // Offline-assigned messages exist only here; anything else may just
        // not have its body downloaded.
        if let Some(missing) = uids
            .iter()
            .find(|uid| uid.is_offline() && !source.bodies.contains_key(*uid))
        {
            return Err(Error::invalid_uid(&self.name, missing));
        }

        let mappings: Vec<UidMapping> = uids
            .iter()
            .map(|uid| UidMapping::new(uid.clone(), cache.next_offline_uid()))
            .collect();
        cache.transfer(&self.name, destination.name(), &mappings, delete);
        Ok(mappings)
    }
}

#[async_trait]
impl FolderBackend for MemoryFolder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh_info_online(&self) -> Result<Vec<MessageInfo>> {
        let mut remote = self.remote.state.lock().await;
        remote.enter("refresh_info_online", &self.name, true)?;
        Ok(remote
            .folder(&self.name)?
            .messages
            .iter()
            .map(|(n, (message, flags))| {
                MessageInfo::from_message(Uid::from(*n), message, flags.clone())
            })
            .collect())
    }

    async fn sync_online(&self, changed: &[MessageInfo]) -> Result<()> {
        let mut remote = self.remote.state.lock().await;
        remote.enter("sync_online", &self.name, true)?;
        let folder = remote.folder_mut(&self.name)?;
        for info in changed {
            let Ok(n) = info.uid.as_str().parse::<u32>() else {
                continue;
            };
            if let Some((_, flags)) = folder.messages.get_mut(&n) {
                flags.clone_from(&info.flags);
            }
        }
        Ok(())
    }

    async fn sync_offline(&self) -> Result<()> {
        self.remote
            .state
            .lock()
            .await
            .enter("sync_offline", &self.name, false)
    }

    async fn expunge_uids_online(&self, uids: &[Uid]) -> Result<()> {
        let mut remote = self.remote.state.lock().await;
        remote.enter(
            "expunge_uids_online",
            &format!("{} {}", self.name, join(uids)),
            true,
        )?;
        let folder = remote.folder_mut(&self.name)?;
        let mut numbers = Vec::with_capacity(uids.len());
        for uid in uids {
            let n = remote_uid(&self.name, uid)?;
            if !folder.messages.contains_key(&n) {
                return Err(Error::invalid_uid(&self.name, uid));
            }
            numbers.push(n);
        }
        for n in &numbers {
            folder.messages.remove(n);
        }

        let mut cache = self.cache.state.lock().await;
        let local = cache.folder_mut(&self.name);
        for uid in uids {
            local.bodies.remove(uid);
        }
        Ok(())
    }

    async fn expunge_uids_offline(&self, uids: &[Uid]) -> Result<()> {
        self.remote.state.lock().await.enter(
            "expunge_uids_offline",
            &format!("{} {}", self.name, join(uids)),
            false,
        )?;
        let mut cache = self.cache.state.lock().await;
        let local = cache.folder_mut(&self.name);
        for uid in uids {
            local.bodies.remove(uid);
        }
        Ok(())
    }

    async fn append_online(&self, message: &Message, flags: &Flags) -> Result<Uid> {
        let mut remote = self.remote.state.lock().await;
        remote.enter("append_online", &self.name, true)?;
        let folder = remote.folder_mut(&self.name)?;
        folder.next_uid += 1;
        folder
            .messages
            .insert(folder.next_uid, (message.clone(), flags.clone()));
        let uid = Uid::from(folder.next_uid);

        self.cache
            .state
            .lock()
            .await
            .store_body(&self.name, uid.clone(), message.clone());
        Ok(uid)
    }

    async fn append_offline(&self, message: &Message, _flags: &Flags) -> Result<Uid> {
        self.remote
            .state
            .lock()
            .await
            .enter("append_offline", &self.name, false)?;
        let mut cache = self.cache.state.lock().await;
        let uid = cache.next_offline_uid();
        cache.store_body(&self.name, uid.clone(), message.clone());
        Ok(uid)
    }

    async fn copy_online(
        &self,
        uids: &[Uid],
        destination: &dyn FolderBackend,
    ) -> Result<Vec<UidMapping>> {
        self.transfer_online(uids, destination, false).await
    }

    async fn copy_offline(
        &self,
        uids: &[Uid],
        destination: &dyn FolderBackend,
    ) -> Result<Vec<UidMapping>> {
        self.transfer_offline(uids, destination, false).await
    }

    async fn move_online(
        &self,
        uids: &[Uid],
        destination: &dyn FolderBackend,
    ) -> Result<Vec<UidMapping>> {
        self.transfer_online(uids, destination, true).await
    }

    async fn move_offline(
        &self,
        uids: &[Uid],
        destination: &dyn FolderBackend,
    ) -> Result<Vec<UidMapping>> {
        self.transfer_offline(uids, destination, true).await
    }

    async fn get_message_online(&self, uid: &Uid) -> Result<Message> {
        let mut remote = self.remote.state.lock().await;
        remote.enter("get_message_online", &format!("{} {uid}", self.name), true)?;
        let n = remote_uid(&self.name, uid)?;
        let message = remote
            .folder(&self.name)?
            .messages
            .get(&n)
            .map(|(m, _)| m.clone())
            .ok_or_else(|| Error::invalid_uid(&self.name, uid))?;
        self.cache
            .state
            .lock()
            .await
            .store_body(&self.name, uid.clone(), message.clone());
        Ok(message)
    }

    async fn get_message_offline(&self, uid: &Uid) -> Result<Message> {
        self.remote.state.lock().await.enter(
            "get_message_offline",
            &format!("{} {uid}", self.name),
            false,
        )?;
        self.cache
            .state
            .lock()
            .await
            .folders
            .get(&self.name)
            .and_then(|f| f.bodies.get(uid).cloned())
            .ok_or_else(|| {
                Error::NotAvailableOffline(format!("{}/{uid} was never downloaded", self.name))
            })
    }

    async fn resolve_offline_uid(&self, offline: &Uid, online: &Uid) -> Result<()> {
        let mut cache = self.cache.state.lock().await;
        let local = cache.folder_mut(&self.name);
        if let Some(body) = local.bodies.remove(offline) {
            local.bodies.entry(online.clone()).or_insert(body);
        }
        Ok(())
    }

    async fn prepare_for_offline(&self, uids: &[Uid]) -> Result<()> {
        let mut remote = self.remote.state.lock().await;
        remote.enter("prepare_for_offline", &self.name, true)?;
        let folder = remote.folder(&self.name)?;
        let mut cache = self.cache.state.lock().await;
        for uid in uids {
            let Ok(n) = uid.as_str().parse::<u32>() else {
                continue;
            };
            if let Some((message, _)) = folder.messages.get(&n) {
                cache.store_body(&self.name, uid.clone(), message.clone());
            }
        }
        Ok(())
    }
}

/// Shorthand for a seen flag set, handy when seeding.
#[must_use]
pub fn seen() -> Flags {
    Flags::from_vec(vec![Flag::Seen])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message(subject: &str) -> Message {
        Message::new(format!("Subject: {subject}\r\n\r\nbody\r\n"))
    }

    #[tokio::test]
    async fn offline_appends_get_sequential_offline_uids() {
        let remote = MemoryRemote::new();
        remote.add_folder("INBOX").await;
        let store = MemoryStore::new(remote.clone());
        let folder = store
            .get_folder_offline("INBOX", GetFolderFlags::default())
            .await
            .unwrap();

        let a = folder.append_offline(&message("a"), &Flags::new()).await.unwrap();
        let b = folder.append_offline(&message("b"), &Flags::new()).await.unwrap();

        assert_eq!(a, Uid::offline(1));
        assert_eq!(b, Uid::offline(2));
        assert!(store.cache().has_body("INBOX", &a).await);
        assert!(remote.uids("INBOX").await.is_empty());
    }

    #[tokio::test]
    async fn online_expunge_is_all_or_nothing() {
        let remote = MemoryRemote::new();
        let uid = remote.seed("INBOX", message("a"), seen()).await;
        let store = MemoryStore::new(remote.clone());
        let folder = store
            .get_folder_online("INBOX", GetFolderFlags::default())
            .await
            .unwrap();

        let err = folder
            .expunge_uids_online(&[uid.clone(), Uid::from(99)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUid { .. }));
        assert_eq!(remote.uids("INBOX").await, vec![uid]);
    }

    #[tokio::test]
    async fn offline_move_rejects_unknown_offline_uid_without_side_effects() {
        let remote = MemoryRemote::new();
        remote.add_folder("INBOX").await;
        remote.add_folder("Archive").await;
        let store = MemoryStore::new(remote);
        let inbox = store
            .get_folder_offline("INBOX", GetFolderFlags::default())
            .await
            .unwrap();
        let archive = store
            .get_folder_offline("Archive", GetFolderFlags::default())
            .await
            .unwrap();
        let kept = inbox.append_offline(&message("a"), &Flags::new()).await.unwrap();

        let err = inbox
            .move_offline(&[kept.clone(), Uid::offline(9)], archive.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUid { .. }));
        assert!(store.cache().has_body("INBOX", &kept).await);
    }

    #[tokio::test]
    async fn injected_failures_and_cancellation() {
        let remote = MemoryRemote::new();
        let store = MemoryStore::new(remote.clone());

        remote.fail_next("connect_transport").await;
        assert!(store.connect_transport().await.is_err());
        assert!(store.connect_transport().await.is_ok());
        assert!(remote.is_transport_open().await);

        remote.cancel_next().await;
        assert!(matches!(store.connect_online().await, Err(Error::Cancelled)));
        // Offline hooks are never cancelled or blocked by reachability.
        remote.set_reachable(false).await;
        assert!(store.connect_offline().await.is_ok());
        assert!(matches!(
            store.connect_online().await,
            Err(Error::ConnectionFailed(_))
        ));

        assert_eq!(
            remote.take_calls().await,
            vec![
                "connect_transport",
                "connect_transport",
                "connect_online",
                "connect_offline",
                "connect_online",
            ]
        );
        assert!(remote.calls().await.is_empty());
    }

    #[tokio::test]
    async fn listing_respects_depth_and_subscriptions() {
        let remote = MemoryRemote::new();
        for name in ["INBOX", "Lists", "Lists/rust", "Lists/rust/announce"] {
            remote.add_folder(name).await;
        }
        let store = MemoryStore::new(remote.clone()).with_subscriptions();
        store.subscribe_online("Lists/rust").await.unwrap();
        assert!(remote.is_subscribed("Lists/rust").await);

        let names = |infos: Vec<FolderInfo>| -> Vec<String> {
            infos.into_iter().map(|i| i.full_name).collect()
        };
        let top = store
            .get_folder_info_online("", FolderInfoFlags::default())
            .await
            .unwrap();
        assert_eq!(names(top), vec!["INBOX", "Lists"]);

        let flags = FolderInfoFlags {
            recursive: true,
            ..FolderInfoFlags::default()
        };
        let lists = store.get_folder_info_online("Lists", flags).await.unwrap();
        assert_eq!(lists.len(), 3);

        let subscribed = FolderInfoFlags {
            recursive: true,
            subscribed_only: true,
            fast: true,
        };
        let cached = store.get_folder_info_offline("", subscribed).await.unwrap();
        assert_eq!(names(cached), vec!["Lists/rust"]);
    }
}
