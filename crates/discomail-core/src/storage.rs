//! Local database for a store.
//!
//! Every store keeps its summaries, known folders and diary in one `SQLite`
//! database. Writes use `synchronous = FULL`, so a committed diary entry has
//! been flushed to disk before the write returns.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::debug;

use crate::Result;
use crate::diary::Diary;
use crate::summary::SummaryRepository;

/// Open (creating if needed) a database file.
pub(crate) async fn file_pool(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    debug!("Opened local store database at {}", path.display());
    Ok(pool)
}

/// Create a private in-memory database.
pub(crate) async fn memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Turns a store URL into a file name that is safe on every platform.
#[must_use]
pub fn database_file_name(url: &str) -> String {
    let mut name: String = url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    name.push_str(".db");
    name
}

/// Summary repository and diary sharing one database.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    summaries: SummaryRepository,
    diary: Diary,
}

impl LocalStorage {
    /// Open the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::from_pool(file_pool(path).await?).await
    }

    /// Create an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub async fn in_memory() -> Result<Self> {
        Self::from_pool(memory_pool().await?).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        Ok(Self {
            summaries: SummaryRepository::from_pool(pool.clone()).await?,
            diary: Diary::from_pool(pool).await?,
        })
    }

    /// Summary and folder registry storage.
    #[must_use]
    pub const fn summaries(&self) -> &SummaryRepository {
        &self.summaries
    }

    /// The operation diary.
    #[must_use]
    pub const fn diary(&self) -> &Diary {
        &self.diary
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(
            database_file_name("imap://me@mail.example.com"),
            "imap___me_mail.example.com.db"
        );
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let storage = LocalStorage::open(&path).await.unwrap();
        assert!(storage.diary().is_empty().await.unwrap());
        assert!(path.exists());
    }
}
