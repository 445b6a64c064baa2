//! Diary replay.
//!
//! Walks the diary in log order and re-issues every entry through an
//! online [`ReplayExecutor`]. Replay is best-effort: a failing entry is
//! logged, reported and then dropped or retained according to
//! [`ReplayFailurePolicy`], and the remaining entries still run. Under
//! [`ReplayFailurePolicy::Retain`] a retained entry holds back every later
//! entry that touches one of its folders, so the next run replays them in
//! their original order.
//!
//! Offline-assigned UIDs are translated through the diary's UID map before an
//! entry is re-issued. An Append whose offline UID is already mapped has been
//! applied before (e.g. the process died before the entry was removed) and is
//! skipped.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ReplayFailurePolicy;
use crate::diary::{Diary, DiaryEntry, UidMapEntry};
use crate::types::{Uid, UidMapping};
use crate::{Error, Result};

/// One message of a Copy/Move entry as re-issued online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    /// Source UID, already translated to its online value.
    pub source: Uid,
    /// UID the message received in the destination while offline.
    pub offline_destination: Option<Uid>,
}

/// Online implementation of every diarized operation.
#[async_trait]
pub trait ReplayExecutor: Send {
    /// Append the locally stored message `uid` of `folder` to the remote.
    ///
    /// Returns the UID the remote assigned, or `None` when the message is no
    /// longer in the local cache (it was appended and then removed offline).
    async fn replay_append(&mut self, folder: &str, uid: &Uid) -> Result<Option<Uid>>;

    /// Expunge `uids` from `folder` on the remote.
    async fn replay_expunge(&mut self, folder: &str, uids: &[Uid]) -> Result<()>;

    /// Copy (or move, when `delete_originals`) messages on the remote.
    ///
    /// Returns the offline destination UIDs resolved to their online values.
    async fn replay_transfer(
        &mut self,
        source: &str,
        destination: &str,
        items: &[TransferItem],
        delete_originals: bool,
    ) -> Result<Vec<UidMapping>>;
}

/// A diary entry that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFailure {
    /// Position of the entry in the log.
    pub seq: i64,
    /// The entry.
    pub entry: DiaryEntry,
    /// Why it failed.
    pub reason: String,
}

/// Outcome of a replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Entries applied to the remote.
    pub applied: usize,
    /// Entries that turned out to need no remote work.
    pub skipped: usize,
    /// Entries that failed.
    pub failures: Vec<ReplayFailure>,
    /// Failed entries kept in the diary.
    pub retained: usize,
    /// Entries left in the diary behind a retained entry for the same folder.
    pub deferred: usize,
}

impl ReplayReport {
    /// Returns true if every entry replayed cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Applied {
    Done(Vec<UidMapEntry>),
    Skipped,
}

/// Replays a [`Diary`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Replayer {
    policy: ReplayFailurePolicy,
}

impl Replayer {
    /// Creates a replayer with the given failure policy.
    #[must_use]
    pub const fn new(policy: ReplayFailurePolicy) -> Self {
        Self { policy }
    }

    /// Replay every pending entry in log order.
    ///
    /// Entry failures are contained in the returned report. Only local
    /// storage errors abort the run.
    ///
    /// # Errors
    ///
    /// Returns an error if the diary itself cannot be read or updated.
    pub async fn replay<E>(&self, diary: &Diary, executor: &mut E) -> Result<ReplayReport>
    where
        E: ReplayExecutor + ?Sized,
    {
        let entries = diary.entries().await?;
        let mut report = ReplayReport::default();
        if entries.is_empty() {
            return Ok(report);
        }
        info!("Replaying {} diary entries", entries.len());

        let mut blocked: HashSet<String> = HashSet::new();
        for logged in entries {
            let folders = logged.entry.folders();
            if folders.iter().any(|folder| blocked.contains(*folder)) {
                debug!("Deferring #{} {} behind a retained entry", logged.seq, logged.entry);
                blocked.extend(folders.into_iter().map(str::to_string));
                report.deferred += 1;
                continue;
            }

            match Self::apply(diary, executor, &logged.entry).await {
                Ok(Applied::Done(resolved)) => {
                    diary.complete(logged.seq, &resolved).await?;
                    report.applied += 1;
                }
                Ok(Applied::Skipped) => {
                    diary.complete(logged.seq, &[]).await?;
                    report.skipped += 1;
                }
                Err(e) => {
                    let conflict = Error::ReplayConflict(format!(
                        "#{} {}: {e}",
                        logged.seq, logged.entry
                    ));
                    warn!("{conflict}");
                    match self.policy {
                        ReplayFailurePolicy::Drop => diary.discard(logged.seq).await?,
                        ReplayFailurePolicy::Retain => {
                            diary.record_failure(logged.seq, &e.to_string()).await?;
                            blocked
                                .extend(logged.entry.folders().into_iter().map(str::to_string));
                            report.retained += 1;
                        }
                    }
                    report.failures.push(ReplayFailure {
                        seq: logged.seq,
                        entry: logged.entry,
                        reason: conflict.to_string(),
                    });
                }
            }
        }

        if diary.is_empty().await? {
            diary.clear_uidmap().await?;
        }

        info!(
            "Replay finished: {} applied, {} skipped, {} failed, {} deferred",
            report.applied,
            report.skipped,
            report.failures.len(),
            report.deferred
        );
        Ok(report)
    }

    async fn apply<E>(diary: &Diary, executor: &mut E, entry: &DiaryEntry) -> Result<Applied>
    where
        E: ReplayExecutor + ?Sized,
    {
        match entry {
            DiaryEntry::Append { folder, uid } => {
                if diary.lookup(folder, uid).await?.is_some() {
                    debug!("Append of {folder}/{uid} already replayed");
                    return Ok(Applied::Skipped);
                }
                Ok(executor
                    .replay_append(folder, uid)
                    .await?
                    .map_or(Applied::Skipped, |online| {
                        Applied::Done(vec![UidMapEntry {
                            folder: folder.clone(),
                            offline: uid.clone(),
                            online,
                        }])
                    }))
            }
            DiaryEntry::Expunge { folder, uids } => {
                let mut online = Vec::with_capacity(uids.len());
                for uid in uids {
                    if let Some(uid) = translate(diary, folder, uid).await? {
                        online.push(uid);
                    }
                }
                if online.is_empty() {
                    return Ok(Applied::Skipped);
                }
                executor.replay_expunge(folder, &online).await?;
                Ok(Applied::Done(Vec::new()))
            }
            DiaryEntry::Copy {
                source,
                destination,
                uids,
                destination_uids,
            } => {
                Self::apply_transfer(
                    diary,
                    executor,
                    source,
                    destination,
                    uids,
                    destination_uids,
                    false,
                )
                .await
            }
            DiaryEntry::Move {
                source,
                destination,
                uids,
                destination_uids,
            } => {
                Self::apply_transfer(
                    diary,
                    executor,
                    source,
                    destination,
                    uids,
                    destination_uids,
                    true,
                )
                .await
            }
        }
    }

    async fn apply_transfer<E>(
        diary: &Diary,
        executor: &mut E,
        source: &str,
        destination: &str,
        uids: &[Uid],
        destination_uids: &[Uid],
        delete_originals: bool,
    ) -> Result<Applied>
    where
        E: ReplayExecutor + ?Sized,
    {
        let mut items = Vec::with_capacity(uids.len());
        let mut resolved = Vec::new();

        for (i, uid) in uids.iter().enumerate() {
            let offline_destination = destination_uids.get(i).cloned();
            match translate(diary, source, uid).await? {
                Some(online) => items.push(TransferItem {
                    source: online,
                    offline_destination,
                }),
                // The source never reached the remote; upload the local copy
                // that landed in the destination instead.
                None => {
                    if let Some(dest_uid) = offline_destination
                        && let Some(online) = executor.replay_append(destination, &dest_uid).await?
                    {
                        resolved.push(UidMapEntry {
                            folder: destination.to_string(),
                            offline: dest_uid,
                            online,
                        });
                    }
                }
            }
        }

        if !items.is_empty() {
            let mappings = executor
                .replay_transfer(source, destination, &items, delete_originals)
                .await?;
            resolved.extend(mappings.into_iter().map(|m| UidMapEntry {
                folder: destination.to_string(),
                offline: m.source,
                online: m.destination,
            }));
        }

        if items.is_empty() && resolved.is_empty() {
            Ok(Applied::Skipped)
        } else {
            Ok(Applied::Done(resolved))
        }
    }
}

/// Online value of `uid`: mapped offline UIDs resolve, unmapped offline UIDs
/// never existed remotely and resolve to `None`, remote UIDs pass through.
async fn translate(diary: &Diary, folder: &str, uid: &Uid) -> Result<Option<Uid>> {
    if let Some(online) = diary.lookup(folder, uid).await? {
        return Ok(Some(online));
    }
    Ok((!uid.is_offline()).then(|| uid.clone()))
}
