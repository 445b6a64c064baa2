//! Integration tests for online/offline dispatch.
//!
//! These drive `DiscoStore` and `DiscoFolder` through the in-memory backend
//! and assert which hooks ran using the remote's call log.

#![allow(clippy::unwrap_used)]

use discomail_core::backend::{MemoryRemote, MemoryStore};
use discomail_core::{
    ConnectivityStatus, DiaryEntry, DiscoConfig, DiscoStore, Error, Flag, Flags, FolderInfoFlags,
    GetFolderFlags, LocalStorage, Message, StoreEvent, Uid,
};

fn message(subject: &str) -> Message {
    Message::new(format!(
        "From: alice@example.com\r\nSubject: {subject}\r\n\r\nHello\r\n"
    ))
}

fn offline_config() -> DiscoConfig {
    DiscoConfig {
        start_offline: true,
        ..DiscoConfig::default()
    }
}

async fn store_with(backend: MemoryStore, config: &DiscoConfig) -> DiscoStore {
    let storage = LocalStorage::in_memory().await.unwrap();
    DiscoStore::new("mem://test", Box::new(backend), storage, config)
}

async fn online_store(remote: &MemoryRemote) -> DiscoStore {
    let store = store_with(MemoryStore::new(remote.clone()), &DiscoConfig::default()).await;
    store.connect().await.unwrap();
    store
}

#[tokio::test]
async fn connect_runs_status_specific_hook() {
    let remote = MemoryRemote::new();
    let online = store_with(MemoryStore::new(remote.clone()), &DiscoConfig::default()).await;
    online.connect().await.unwrap();
    assert_eq!(
        remote.take_calls().await,
        vec!["connect_transport", "connect_online"]
    );

    // Offline connect works without a reachable remote.
    remote.set_reachable(false).await;
    let offline = store_with(MemoryStore::new(remote.clone()), &offline_config()).await;
    offline.connect().await.unwrap();
    assert_eq!(offline.status(), ConnectivityStatus::Offline);
    assert_eq!(
        remote.take_calls().await,
        vec!["connect_transport", "connect_offline"]
    );
}

#[tokio::test]
async fn failed_connect_hook_closes_transport() {
    let remote = MemoryRemote::new();
    remote.set_reachable(false).await;
    let store = store_with(MemoryStore::new(remote.clone()), &DiscoConfig::default()).await;

    let err = store.connect().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionFailed(_)));
    assert!(!store.is_connected().await);
    assert!(!remote.is_transport_open().await);
}

#[tokio::test]
async fn disconnect_hook_failure_keeps_transport_open() {
    let remote = MemoryRemote::new();
    let store = online_store(&remote).await;

    remote.fail_next("disconnect_online").await;
    assert!(store.disconnect(true).await.is_err());
    assert!(store.is_connected().await);
    assert!(remote.is_transport_open().await);
    assert!(
        !remote
            .calls()
            .await
            .iter()
            .any(|c| c.starts_with("disconnect_transport"))
    );

    store.disconnect(true).await.unwrap();
    assert!(!store.is_connected().await);
    assert!(!remote.is_transport_open().await);
}

#[tokio::test]
async fn failed_status_switch_restores_the_previous_session() {
    let remote = MemoryRemote::new();
    let store = online_store(&remote).await;
    remote.take_calls().await;

    remote.fail_next("connect_offline").await;
    assert!(store.set_status(ConnectivityStatus::Offline).await.is_err());
    assert_eq!(store.status(), ConnectivityStatus::Online);
    assert_eq!(
        remote.take_calls().await,
        vec!["disconnect_online clean", "connect_offline", "connect_online"]
    );

    store
        .set_status(ConnectivityStatus::Offline)
        .await
        .unwrap();
    remote.take_calls().await;
    remote.set_reachable(false).await;
    assert!(store.set_status(ConnectivityStatus::Online).await.is_err());
    assert_eq!(store.status(), ConnectivityStatus::Offline);
    assert_eq!(
        remote.take_calls().await,
        vec!["disconnect_offline clean", "connect_online", "connect_offline"]
    );
}

#[tokio::test]
async fn offline_get_folder_requires_folder_seen_online() {
    let remote = MemoryRemote::new();
    remote.add_folder("INBOX").await;
    let storage = LocalStorage::in_memory().await.unwrap();

    let offline = DiscoStore::new(
        "mem://test",
        Box::new(MemoryStore::new(remote.clone())),
        storage.clone(),
        &offline_config(),
    );
    let err = offline
        .get_folder("INBOX", GetFolderFlags::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotAvailableOffline(_)));
    assert!(remote.take_calls().await.is_empty());

    // Open it once online on the same local database.
    let online = DiscoStore::new(
        "mem://test",
        Box::new(MemoryStore::new(remote.clone())),
        storage,
        &DiscoConfig::default(),
    );
    drop(
        online
            .get_folder("INBOX", GetFolderFlags::default())
            .await
            .unwrap(),
    );
    remote.take_calls().await;

    let folder = offline
        .get_folder("INBOX", GetFolderFlags::default())
        .await
        .unwrap();
    assert_eq!(folder.name(), "INBOX");
    assert_eq!(remote.take_calls().await, vec!["get_folder_offline INBOX"]);
}

#[tokio::test]
async fn open_folder_is_shared() {
    let remote = MemoryRemote::new();
    remote.add_folder("INBOX").await;
    let store = online_store(&remote).await;

    let a = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    remote.take_calls().await;
    let b = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    assert!(remote.take_calls().await.is_empty());

    a.append_message(&message("shared"), Flags::new()).await.unwrap();
    assert_eq!(b.message_count().await, 1);
}

#[tokio::test]
async fn get_folder_online_can_create() {
    let remote = MemoryRemote::new();
    let store = online_store(&remote).await;

    let err = store
        .get_folder("Drafts", GetFolderFlags::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSuchFolder(_)));

    store
        .get_folder("Drafts", GetFolderFlags::create())
        .await
        .unwrap();
    assert!(remote.has_folder("Drafts").await);
    assert!(store.storage().summaries().is_registered("Drafts").await.unwrap());
}

#[tokio::test]
async fn offline_folder_info_with_subscriptions_fails_fast() {
    let remote = MemoryRemote::new();
    remote.add_folder("INBOX").await;
    let store = store_with(
        MemoryStore::new(remote.clone()).with_subscriptions(),
        &offline_config(),
    )
    .await;

    let err = store
        .get_folder_info("", FolderInfoFlags::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ServiceUnavailable(_)));
    assert!(remote.take_calls().await.is_empty());

    let subscribed = FolderInfoFlags {
        subscribed_only: true,
        ..FolderInfoFlags::default()
    };
    let infos = store.get_folder_info("", subscribed).await.unwrap();
    assert!(infos.is_empty());
    assert_eq!(remote.take_calls().await, vec!["get_folder_info_offline"]);
}

#[tokio::test]
async fn folder_listing_maintains_registry() {
    let remote = MemoryRemote::new();
    remote.add_folder("INBOX").await;
    remote.add_folder("Old").await;
    let store = online_store(&remote).await;
    let mut events = store.subscribe();

    let all = FolderInfoFlags {
        recursive: true,
        ..FolderInfoFlags::default()
    };
    assert_eq!(store.get_folder_info("", all).await.unwrap().len(), 2);

    let created: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| match e {
            StoreEvent::FolderCreated(info) => Some(info.full_name),
            _ => None,
        })
        .collect();
    assert_eq!(created, vec!["INBOX", "Old"]);

    // A second store on a remote without "Old" forgets it.
    let other = MemoryRemote::new();
    other.add_folder("INBOX").await;
    let storage = store.storage().clone();
    let store = DiscoStore::new(
        "mem://test",
        Box::new(MemoryStore::new(other)),
        storage,
        &DiscoConfig::default(),
    );
    let mut events = store.subscribe();
    store.get_folder_info("", all).await.unwrap();

    assert_eq!(
        events.try_recv().unwrap(),
        StoreEvent::FolderRemoved {
            folder: "Old".into()
        }
    );
    let known = store.storage().summaries().registered_folders().await.unwrap();
    assert_eq!(known.len(), 1);
}

#[tokio::test]
async fn subscription_editing_requires_online() {
    let remote = MemoryRemote::new();
    remote.add_folder("INBOX").await;
    let store = store_with(
        MemoryStore::new(remote.clone()).with_subscriptions(),
        &DiscoConfig::default(),
    )
    .await;

    store.subscribe_folder("INBOX").await.unwrap();
    assert!(remote.is_subscribed("INBOX").await);

    store
        .set_status(ConnectivityStatus::Offline)
        .await
        .unwrap();
    assert!(store.check_online().is_err());
    remote.take_calls().await;

    let err = store.unsubscribe_folder("INBOX").await.unwrap_err();
    assert!(matches!(err, Error::ServiceUnavailable(_)));
    assert!(remote.take_calls().await.is_empty());
    assert!(remote.is_subscribed("INBOX").await);
}

#[tokio::test]
async fn offline_append_is_diarized_and_never_touches_remote() {
    let remote = MemoryRemote::new();
    remote.add_folder("INBOX").await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();

    store
        .set_status(ConnectivityStatus::Offline)
        .await
        .unwrap();
    remote.set_reachable(false).await;
    remote.take_calls().await;

    let uid = inbox
        .append_message(&message("draft"), Flags::from_vec(vec![Flag::Draft]))
        .await
        .unwrap();

    assert_eq!(uid, Uid::offline(1));
    assert_eq!(remote.take_calls().await, vec!["append_offline INBOX"]);
    let entries = store.diary().entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].entry,
        DiaryEntry::Append {
            folder: "INBOX".into(),
            uid: uid.clone(),
        }
    );
    let info = inbox.message_info(&uid).await.unwrap();
    assert_eq!(info.envelope.subject, "draft");
    assert!(info.flags.contains(&Flag::Draft));
}

#[tokio::test]
async fn online_mutations_are_not_diarized() {
    let remote = MemoryRemote::new();
    let first = remote.seed("INBOX", message("one"), Flags::new()).await;
    remote.add_folder("Archive").await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    let archive = store.get_folder("Archive", GetFolderFlags::default()).await.unwrap();
    inbox.refresh_info().await.unwrap();

    let mappings = inbox.move_messages_to(&[first.clone()], &archive).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert!(remote.uids("INBOX").await.is_empty());
    assert_eq!(remote.uids("Archive").await, vec![mappings[0].destination.clone()]);
    assert!(archive.message_info(&mappings[0].destination).await.is_some());
    assert!(inbox.message_info(&first).await.is_none());
    assert!(store.diary().is_empty().await.unwrap());
}

#[tokio::test]
async fn empty_expunge_is_a_no_op() {
    let remote = MemoryRemote::new();
    remote.add_folder("INBOX").await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();

    for status in [ConnectivityStatus::Online, ConnectivityStatus::Offline] {
        store.set_status(status).await.unwrap();
        remote.take_calls().await;
        inbox.expunge_uids(&[]).await.unwrap();
        // Nothing flagged deleted either.
        inbox.expunge().await.unwrap();
        assert!(remote.take_calls().await.is_empty());
        assert!(store.diary().is_empty().await.unwrap());
    }
}

#[tokio::test]
async fn offline_move_with_invalid_uid_fails_as_a_whole() {
    let remote = MemoryRemote::new();
    let uid1 = remote.seed("INBOX", message("one"), Flags::new()).await;
    remote.add_folder("Archive").await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    let archive = store.get_folder("Archive", GetFolderFlags::default()).await.unwrap();
    inbox.refresh_info().await.unwrap();

    store
        .set_status(ConnectivityStatus::Offline)
        .await
        .unwrap();
    remote.take_calls().await;

    let uid2 = Uid::from(42);
    let err = inbox
        .move_messages_to(&[uid1.clone(), uid2.clone()], &archive)
        .await
        .unwrap_err();
    match err {
        Error::InvalidUid { folder, uid } => {
            assert_eq!(folder, "INBOX");
            assert_eq!(uid, uid2);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // All-or-nothing: no hook ran, nothing moved, nothing diarized.
    assert!(remote.take_calls().await.is_empty());
    assert!(inbox.message_info(&uid1).await.is_some());
    assert!(archive.summary().await.is_empty());
    assert!(store.diary().is_empty().await.unwrap());
}

#[tokio::test]
async fn failed_offline_hook_is_not_diarized() {
    let remote = MemoryRemote::new();
    let uid = remote.seed("INBOX", message("one"), Flags::new()).await;
    remote.add_folder("Archive").await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    let archive = store.get_folder("Archive", GetFolderFlags::default()).await.unwrap();
    inbox.refresh_info().await.unwrap();
    store
        .set_status(ConnectivityStatus::Offline)
        .await
        .unwrap();

    remote.fail_next("move_offline").await;
    assert!(inbox.move_messages_to(&[uid.clone()], &archive).await.is_err());
    assert!(store.diary().is_empty().await.unwrap());
    assert!(inbox.message_info(&uid).await.is_some());

    let mappings = inbox.move_messages_to(&[uid.clone()], &archive).await.unwrap();
    let entries = store.diary().entries().await.unwrap();
    assert_eq!(
        entries[0].entry,
        DiaryEntry::Move {
            source: "INBOX".into(),
            destination: "Archive".into(),
            uids: vec![uid],
            destination_uids: vec![mappings[0].destination.clone()],
        }
    );
    assert!(mappings[0].destination.is_offline());
}

#[tokio::test]
async fn unsupported_transfers_are_rejected() {
    let remote = MemoryRemote::new();
    let uid = remote.seed("INBOX", message("one"), Flags::new()).await;
    let store = online_store(&remote).await;
    let other = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    let foreign = other.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    inbox.refresh_info().await.unwrap();
    remote.take_calls().await;

    let same = inbox.copy_messages_to(&[uid.clone()], &inbox).await.unwrap_err();
    assert!(matches!(same, Error::UnsupportedOperation(_)));
    let cross = inbox.copy_messages_to(&[uid], &foreign).await.unwrap_err();
    assert!(matches!(cross, Error::UnsupportedOperation(_)));
    assert!(remote.take_calls().await.is_empty());
}

#[tokio::test]
async fn cancelled_online_operation_is_reported_and_not_diarized() {
    let remote = MemoryRemote::new();
    let uid = remote.seed("INBOX", message("big"), Flags::new()).await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    inbox.refresh_info().await.unwrap();

    remote.cancel_next().await;
    let err = inbox.get_message(&uid).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    remote.cancel_next().await;
    let err = inbox
        .append_message(&message("new"), Flags::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(inbox.message_count().await, 1);
    assert!(store.diary().is_empty().await.unwrap());

    assert_eq!(inbox.get_message(&uid).await.unwrap(), message("big"));
}

#[tokio::test]
async fn flag_changes_are_pushed_on_online_sync() {
    let remote = MemoryRemote::new();
    let uid = remote.seed("INBOX", message("one"), Flags::new()).await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    inbox.refresh_info().await.unwrap();

    store
        .set_status(ConnectivityStatus::Offline)
        .await
        .unwrap();
    let seen = Flags::from_vec(vec![Flag::Seen]);
    assert!(inbox.set_message_flags(&uid, &seen, &seen).await.unwrap());
    inbox.sync(false).await.unwrap();
    assert!(!remote.flags("INBOX", &uid).await.unwrap().is_seen());

    store.set_status(ConnectivityStatus::Online).await.unwrap();
    inbox.sync(false).await.unwrap();
    assert!(remote.flags("INBOX", &uid).await.unwrap().is_seen());
    assert!(inbox.summary().await.changed_infos().is_empty());

    let err = inbox
        .set_message_flags(&Uid::from(99), &seen, &seen)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidUid { .. }));
}

#[tokio::test]
async fn offline_sync_with_expunge_diarizes_deleted_messages() {
    let remote = MemoryRemote::new();
    let keep = remote.seed("INBOX", message("keep"), Flags::new()).await;
    let gone = remote
        .seed("INBOX", message("gone"), Flags::from_vec(vec![Flag::Deleted]))
        .await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    inbox.refresh_info().await.unwrap();
    store
        .set_status(ConnectivityStatus::Offline)
        .await
        .unwrap();
    remote.take_calls().await;

    inbox.sync(true).await.unwrap();

    assert_eq!(
        remote.take_calls().await,
        vec![
            format!("expunge_uids_offline INBOX {gone}"),
            "sync_offline INBOX".to_string(),
        ]
    );
    let entries = store.diary().entries().await.unwrap();
    assert_eq!(
        entries[0].entry,
        DiaryEntry::Expunge {
            folder: "INBOX".into(),
            uids: vec![gone],
        }
    );
    // The summary was flushed.
    let stored = store.storage().summaries().load("INBOX").await.unwrap();
    assert_eq!(stored.uids(), vec![keep]);
}

#[tokio::test]
async fn refresh_is_a_no_op_offline() {
    let remote = MemoryRemote::new();
    remote.seed("INBOX", message("one"), Flags::new()).await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    store
        .set_status(ConnectivityStatus::Offline)
        .await
        .unwrap();
    remote.take_calls().await;

    inbox.refresh_info().await.unwrap();
    assert!(remote.take_calls().await.is_empty());
    assert!(inbox.summary().await.is_empty());
}

#[tokio::test]
async fn messages_are_readable_offline_after_preparing() {
    let remote = MemoryRemote::new();
    let uid = remote.seed("INBOX", message("one"), Flags::new()).await;
    let config = DiscoConfig {
        prepare_on_offline: true,
        ..DiscoConfig::default()
    };
    let store = store_with(MemoryStore::new(remote.clone()), &config).await;
    store.connect().await.unwrap();
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    inbox.refresh_info().await.unwrap();

    store
        .set_status(ConnectivityStatus::Offline)
        .await
        .unwrap();
    assert!(remote.calls().await.contains(&"prepare_for_offline INBOX".to_string()));
    assert_eq!(inbox.get_message(&uid).await.unwrap(), message("one"));
}

#[tokio::test]
async fn uncached_message_is_not_available_offline() {
    let remote = MemoryRemote::new();
    let uid = remote.seed("INBOX", message("one"), Flags::new()).await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    inbox.refresh_info().await.unwrap();
    store
        .set_status(ConnectivityStatus::Offline)
        .await
        .unwrap();

    let err = inbox.get_message(&uid).await.unwrap_err();
    assert!(matches!(err, Error::NotAvailableOffline(_)));
    // Preparing is a no-op offline.
    inbox.prepare_for_offline().await.unwrap();
    assert!(inbox.get_message(&uid).await.is_err());
}

#[tokio::test]
async fn events_arrive_in_mutation_order() {
    let remote = MemoryRemote::new();
    remote.add_folder("INBOX").await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();
    let mut events = store.subscribe();

    let uid = inbox
        .append_message(&message("one"), Flags::new())
        .await
        .unwrap();
    store
        .set_status(ConnectivityStatus::Offline)
        .await
        .unwrap();
    inbox.expunge_uids(&[uid.clone()]).await.unwrap();

    let received: Vec<StoreEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert_eq!(received.len(), 4);
    assert_eq!(
        received[0],
        StoreEvent::RowChanged {
            folder: "INBOX".into(),
            uid: uid.clone(),
        }
    );
    assert!(matches!(&received[1], StoreEvent::FolderUpdated(info) if info.total == Some(1)));
    assert_eq!(
        received[2],
        StoreEvent::StatusChanged {
            status: ConnectivityStatus::Offline,
        }
    );
    assert_eq!(
        received[3],
        StoreEvent::RowDeleted {
            folder: "INBOX".into(),
            uid,
        }
    );
}

#[tokio::test]
async fn folder_outliving_store_is_released() {
    let remote = MemoryRemote::new();
    remote.add_folder("INBOX").await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();

    drop(store);

    assert!(matches!(inbox.refresh_info().await, Err(Error::StoreReleased)));
    assert!(matches!(inbox.store(), Err(Error::StoreReleased)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_status_flips_never_tear_dispatch() {
    let remote = MemoryRemote::new();
    remote.add_folder("INBOX").await;
    let store = online_store(&remote).await;
    let inbox = store.get_folder("INBOX", GetFolderFlags::default()).await.unwrap();

    let flipper = {
        let store = store.clone();
        tokio::spawn(async move {
            for i in 0..10 {
                let status = if i % 2 == 0 {
                    ConnectivityStatus::Offline
                } else {
                    ConnectivityStatus::Online
                };
                store.set_status(status).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let appends: Vec<_> = (0..20)
        .map(|i| {
            let inbox = inbox.clone();
            tokio::spawn(async move {
                inbox
                    .append_message(&message(&format!("m{i}")), Flags::new())
                    .await
                    .unwrap()
            })
        })
        .collect();

    flipper.await.unwrap();
    let mut offline_uids = 0;
    for task in appends {
        if task.await.unwrap().is_offline() {
            offline_uids += 1;
        }
    }
    store.set_status(ConnectivityStatus::Online).await.unwrap();

    let calls = remote.calls().await;
    let offline_calls = calls.iter().filter(|c| *c == "append_offline INBOX").count();
    assert_eq!(offline_calls, offline_uids);
    // Every offline append was replayed, every online one went straight through.
    assert_eq!(remote.uids("INBOX").await.len(), 20);
    assert!(store.diary().is_empty().await.unwrap());
    assert_eq!(store.status(), ConnectivityStatus::Online);
    assert!(!store.is_resyncing());
}
