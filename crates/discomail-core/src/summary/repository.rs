//! Summary and folder registry storage.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

use super::index::SummaryIndex;
use super::model::MessageInfo;
use crate::Result;
use crate::storage;
use crate::types::{Envelope, Flags, FolderInfo, Uid};

/// Repository for folder summaries and the locally known folder tree.
#[derive(Debug, Clone)]
pub struct SummaryRepository {
    pool: SqlitePool,
}

impl SummaryRepository {
    /// Creates a repository on an existing pool, creating tables if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
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
            CREATE TABLE IF NOT EXISTS summaries (
                folder TEXT NOT NULL,
                uid TEXT NOT NULL,
                flags TEXT NOT NULL DEFAULT '',
                size INTEGER NOT NULL DEFAULT 0,
                subject TEXT NOT NULL DEFAULT '',
                from_addr TEXT NOT NULL DEFAULT '',
                to_addr TEXT NOT NULL DEFAULT '',
                date TEXT NOT NULL DEFAULT '',
                message_id TEXT,
                flags_changed INTEGER NOT NULL DEFAULT 0,
                cached_at TEXT NOT NULL,
                PRIMARY KEY(folder, uid)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Locally known folder tree, used to answer lookups while offline
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS folders (
                full_name TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                subscribed INTEGER NOT NULL DEFAULT 0,
                holds_messages INTEGER NOT NULL DEFAULT 1,
                holds_folders INTEGER NOT NULL DEFAULT 1,
                total INTEGER,
                unread INTEGER,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the summary of a folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn load(&self, folder: &str) -> Result<SummaryIndex> {
        let rows = sqlx::query(
            r"
            SELECT uid, flags, size, subject, from_addr, to_addr, date, message_id,
                   flags_changed, cached_at
            FROM summaries
            WHERE folder = ?
            ORDER BY uid
            ",
        )
        .bind(folder)
        .fetch_all(&self.pool)
        .await?;

        let infos = rows.iter().map(row_to_info).collect();
        Ok(SummaryIndex::from_infos(folder, infos))
    }

    /// Write a folder summary, replacing whatever was stored before.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn save(&self, index: &mut SummaryIndex) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(r"DELETE FROM summaries WHERE folder = ?")
            .bind(index.folder())
            .execute(&mut *tx)
            .await?;

        for info in index.iter() {
            sqlx::query(
                r"
                INSERT INTO summaries
                    (folder, uid, flags, size, subject, from_addr, to_addr, date,
                     message_id, flags_changed, cached_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(index.folder())
            .bind(info.uid.as_str())
            .bind(info.flags.to_list_string())
            .bind(i64::try_from(info.size).unwrap_or(i64::MAX))
            .bind(&info.envelope.subject)
            .bind(&info.envelope.from)
            .bind(&info.envelope.to)
            .bind(&info.envelope.date)
            .bind(&info.envelope.message_id)
            .bind(info.flags_changed)
            .bind(info.cached_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(r"UPDATE folders SET total = ?, unread = ?, updated_at = ? WHERE full_name = ?")
            .bind(u32::try_from(index.len()).ok())
            .bind(u32::try_from(index.unread_count()).ok())
            .bind(Utc::now().to_rfc3339())
            .bind(index.folder())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        index.mark_clean();
        Ok(())
    }

    /// Record a folder as known. Returns true if it was not known before.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn register_folder(&self, info: &FolderInfo) -> Result<bool> {
        let known = self.is_registered(&info.full_name).await?;

        sqlx::query(
            r"
            INSERT INTO folders
                (full_name, name, subscribed, holds_messages, holds_folders, total, unread, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(full_name) DO UPDATE SET
                name = excluded.name,
                subscribed = excluded.subscribed,
                holds_messages = excluded.holds_messages,
                holds_folders = excluded.holds_folders,
                total = COALESCE(excluded.total, folders.total),
                unread = COALESCE(excluded.unread, folders.unread),
                updated_at = excluded.updated_at
            ",
        )
        .bind(&info.full_name)
        .bind(&info.name)
        .bind(info.subscribed)
        .bind(info.holds_messages)
        .bind(info.holds_folders)
        .bind(info.total)
        .bind(info.unread)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(!known)
    }

    /// Check if a folder is known locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn is_registered(&self, full_name: &str) -> Result<bool> {
        let row = sqlx::query(r"SELECT COUNT(*) as count FROM folders WHERE full_name = ?")
            .bind(full_name)
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    /// Get a known folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn registered_folder(&self, full_name: &str) -> Result<Option<FolderInfo>> {
        let row = sqlx::query(
            r"
            SELECT full_name, name, subscribed, holds_messages, holds_folders, total, unread
            FROM folders
            WHERE full_name = ?
            ",
        )
        .bind(full_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_folder))
    }

    /// List all known folders.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn registered_folders(&self) -> Result<Vec<FolderInfo>> {
        let rows = sqlx::query(
            r"
            SELECT full_name, name, subscribed, holds_messages, holds_folders, total, unread
            FROM folders
            ORDER BY full_name
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_folder).collect())
    }

    /// Forget a folder and its summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn remove_folder(&self, full_name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(r"DELETE FROM summaries WHERE folder = ?")
            .bind(full_name)
            .execute(&mut *tx)
            .await?;

        sqlx::query(r"DELETE FROM folders WHERE full_name = ?")
            .bind(full_name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn row_to_info(row: &SqliteRow) -> MessageInfo {
    let cached_at_str: String = row.get("cached_at");
    let cached_at = DateTime::parse_from_rfc3339(&cached_at_str)
        .map_or_else(|_| Utc::now(), |t| t.with_timezone(&Utc));
    let flags: String = row.get("flags");

    MessageInfo {
        uid: Uid::new(row.get::<String, _>("uid")),
        flags: Flags::parse_list(&flags),
        size: u64::try_from(row.get::<i64, _>("size")).unwrap_or_default(),
        envelope: Envelope {
            subject: row.get("subject"),
            from: row.get("from_addr"),
            to: row.get("to_addr"),
            date: row.get("date"),
            message_id: row.get("message_id"),
        },
        flags_changed: row.get::<bool, _>("flags_changed"),
        cached_at,
    }
}

fn row_to_folder(row: &SqliteRow) -> FolderInfo {
    FolderInfo {
        full_name: row.get("full_name"),
        name: row.get("name"),
        total: row.get::<Option<u32>, _>("total"),
        unread: row.get::<Option<u32>, _>("unread"),
        subscribed: row.get::<bool, _>("subscribed"),
        holds_messages: row.get::<bool, _>("holds_messages"),
        holds_folders: row.get::<bool, _>("holds_folders"),
    }
}
