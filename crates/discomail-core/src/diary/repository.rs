//! Durable diary storage.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::debug;

use super::model::{DiaryEntry, LoggedEntry, UidMapEntry};
use crate::storage;
use crate::types::Uid;
use crate::{Error, Result};

/// Append-only log of offline mutations plus the offline-to-online UID map.
#[derive(Debug, Clone)]
pub struct Diary {
    pool: SqlitePool,
}

impl Diary {
    /// Creates a diary on an existing pool, creating tables if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let diary = Self { pool };
        diary.initialize().await?;
        Ok(diary)
    }

    /// Create an in-memory diary for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        Self::from_pool(storage::memory_pool().await?).await
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS diary_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                folder TEXT NOT NULL,
                payload TEXT NOT NULL,
                logged_at TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS diary_uidmap (
                folder TEXT NOT NULL,
                offline_uid TEXT NOT NULL,
                online_uid TEXT NOT NULL,
                PRIMARY KEY(folder, offline_uid)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append an entry to the log.
    ///
    /// The entry is committed (and, on a file database, flushed to disk)
    /// before this returns. Returns the entry's sequence number.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be serialized or written.
    pub async fn log(&self, entry: &DiaryEntry) -> Result<i64> {
        let payload = serde_json::to_string(entry)?;

        let result = sqlx::query(
            r"
            INSERT INTO diary_entries (kind, folder, payload, logged_at)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(entry.kind())
        .bind(entry.folder())
        .bind(&payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let seq = result.last_insert_rowid();
        debug!("Diary entry #{seq} logged: {entry}");
        Ok(seq)
    }

    /// All pending entries in log order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored entry is malformed.
    pub async fn entries(&self) -> Result<Vec<LoggedEntry>> {
        let rows = sqlx::query(
            r"
            SELECT seq, kind, payload, logged_at, attempts, last_error
            FROM diary_entries
            ORDER BY seq ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn len(&self) -> Result<usize> {
        let row = sqlx::query(r"SELECT COUNT(*) as count FROM diary_entries")
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.get("count");
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Check if there is nothing to replay.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Remove a replayed entry and record the UIDs it resolved, atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn complete(&self, seq: i64, resolved: &[UidMapEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for mapping in resolved {
            sqlx::query(
                r"
                INSERT INTO diary_uidmap (folder, offline_uid, online_uid)
                VALUES (?, ?, ?)
                ON CONFLICT(folder, offline_uid) DO UPDATE SET online_uid = excluded.online_uid
                ",
            )
            .bind(&mapping.folder)
            .bind(mapping.offline.as_str())
            .bind(mapping.online.as_str())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(r"DELETE FROM diary_entries WHERE seq = ?")
            .bind(seq)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Drop an entry without applying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn discard(&self, seq: i64) -> Result<()> {
        sqlx::query(r"DELETE FROM diary_entries WHERE seq = ?")
            .bind(seq)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Keep an entry for inspection after a failed replay attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record_failure(&self, seq: i64, error: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE diary_entries
            SET attempts = attempts + 1, last_error = ?
            WHERE seq = ?
            ",
        )
        .bind(error)
        .bind(seq)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Resolve an offline UID to the UID the remote assigned during replay.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn lookup(&self, folder: &str, offline: &Uid) -> Result<Option<Uid>> {
        let row = sqlx::query(
            r"SELECT online_uid FROM diary_uidmap WHERE folder = ? AND offline_uid = ?",
        )
        .bind(folder)
        .bind(offline.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Uid::new(row.get::<String, _>("online_uid"))))
    }

    /// Forget resolved UIDs. Only meaningful once the log is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn clear_uidmap(&self) -> Result<()> {
        sqlx::query(r"DELETE FROM diary_uidmap")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Truncate the whole diary, UID map included.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(r"DELETE FROM diary_entries")
            .execute(&mut *tx)
            .await?;
        sqlx::query(r"DELETE FROM diary_uidmap")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<LoggedEntry> {
    let seq: i64 = row.get("seq");
    let kind: String = row.get("kind");
    let payload: String = row.get("payload");
    let entry: DiaryEntry = serde_json::from_str(&payload)?;

    if entry.kind() != kind {
        return Err(Error::Syntax(format!(
            "diary entry #{seq} is filed as {kind} but contains {}",
            entry.kind()
        )));
    }

    let logged_at_str: String = row.get("logged_at");
    let logged_at = DateTime::parse_from_rfc3339(&logged_at_str)
        .map_err(|e| Error::Syntax(format!("diary entry #{seq} timestamp: {e}")))?
        .with_timezone(&Utc);

    Ok(LoggedEntry {
        seq,
        entry,
        logged_at,
        attempts: u32::try_from(row.get::<i64, _>("attempts")).unwrap_or_default(),
        last_error: row.get("last_error"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn append(uid: u64) -> DiaryEntry {
        DiaryEntry::Append {
            folder: "INBOX".into(),
            uid: Uid::offline(uid),
        }
    }

    #[tokio::test]
    async fn test_log_preserves_order() {
        let diary = Diary::in_memory().await.unwrap();
        diary.log(&append(1)).await.unwrap();
        diary
            .log(&DiaryEntry::Expunge {
                folder: "INBOX".into(),
                uids: vec![Uid::offline(1)],
            })
            .await
            .unwrap();
        diary.log(&append(2)).await.unwrap();

        let entries = diary.entries().await.unwrap();
        let kinds: Vec<_> = entries.iter().map(|e| e.entry.kind()).collect();
        assert_eq!(kinds, vec!["append", "expunge", "append"]);
        assert!(entries.windows(2).all(|w| w[0].seq < w[1].seq));
        assert_eq!(diary.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_complete_removes_entry_and_records_mapping() {
        let diary = Diary::in_memory().await.unwrap();
        let seq = diary.log(&append(1)).await.unwrap();

        diary
            .complete(
                seq,
                &[UidMapEntry {
                    folder: "INBOX".into(),
                    offline: Uid::offline(1),
                    online: Uid::from(18),
                }],
            )
            .await
            .unwrap();

        assert!(diary.is_empty().await.unwrap());
        assert_eq!(
            diary.lookup("INBOX", &Uid::offline(1)).await.unwrap(),
            Some(Uid::from(18))
        );
        assert_eq!(diary.lookup("Other", &Uid::offline(1)).await.unwrap(), None);

        diary.clear_uidmap().await.unwrap();
        assert_eq!(diary.lookup("INBOX", &Uid::offline(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_record_failure_keeps_entry() {
        let diary = Diary::in_memory().await.unwrap();
        let seq = diary.log(&append(1)).await.unwrap();

        diary.record_failure(seq, "remote rejected").await.unwrap();
        diary.record_failure(seq, "still rejected").await.unwrap();

        let entries = diary.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempts, 2);
        assert_eq!(entries[0].last_error.as_deref(), Some("still rejected"));

        diary.discard(seq).await.unwrap();
        assert!(diary.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diary.db");

        {
            let diary = Diary::from_pool(storage::file_pool(&path).await.unwrap())
                .await
                .unwrap();
            diary.log(&append(1)).await.unwrap();
        }

        let reopened = Diary::from_pool(storage::file_pool(&path).await.unwrap())
            .await
            .unwrap();
        let entries = reopened.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry, append(1));
    }

    #[tokio::test]
    async fn test_mismatched_kind_is_a_syntax_error() {
        let diary = Diary::in_memory().await.unwrap();
        sqlx::query(
            r"INSERT INTO diary_entries (kind, folder, payload, logged_at) VALUES (?, ?, ?, ?)",
        )
        .bind("expunge")
        .bind("INBOX")
        .bind(serde_json::to_string(&append(1)).unwrap())
        .bind(Utc::now().to_rfc3339())
        .execute(&diary.pool)
        .await
        .unwrap();

        assert!(matches!(diary.entries().await, Err(Error::Syntax(_))));
    }
}
