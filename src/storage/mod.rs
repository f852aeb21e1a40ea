pub mod repository;
pub mod stores;

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite_migration::{Migrations, M};

use crate::error::{Error, Result};
use crate::models::{Credentials, Dataset, Report, UserProfile};

/// Database wraps two `tokio_rusqlite::Connection` instances (writer + reader)
/// using WAL mode for concurrent access. The writer serializes writes via
/// `tokio_rusqlite`'s internal channel; the reader can proceed without blocking.
#[derive(Clone)]
pub struct Database {
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
}

/// Default database location (`~/.glucopipe/glucopipe.db`).
pub fn default_path() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
        .join(".glucopipe")
        .join("glucopipe.db"))
}

impl Database {
    /// Open the database at the default path.
    pub async fn open() -> Result<Self> {
        Self::open_at(default_path()?).await
    }

    /// Open the database at the given path, creating parent directories.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| Error::Config(e.to_string()))?;
        }

        let writer = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_writer(&writer).await?;

        let reader = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_reader(&reader).await?;

        Ok(Self { writer, reader })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let writer = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init_writer(&writer).await?;

        // In-memory databases are per-connection, so reads share the writer.
        Ok(Self {
            reader: writer.clone(),
            writer,
        })
    }

    async fn init_writer(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
            migrations().to_latest(conn)?;
            Ok::<(), Error>(())
        })
        .await?;
        Ok(())
    }

    async fn init_reader(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
        Ok(())
    }

    /// Get a reference to the writer connection.
    pub fn writer(&self) -> &tokio_rusqlite::Connection {
        &self.writer
    }

    /// Get a reference to the reader connection.
    pub fn reader(&self) -> &tokio_rusqlite::Connection {
        &self.reader
    }
}

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!("migrations/001_initial.sql"))])
}

/// Object storage for normalized daily datasets.
#[allow(async_fn_in_trait)]
pub trait BlobStore {
    /// Write the dataset under its key, replacing any previous version.
    async fn put_dataset(&self, dataset: &Dataset) -> Result<String>;

    /// Read one user's dataset for one UTC day. `None` when the day was never
    /// stored.
    async fn get_dataset(&self, user_id: &str, date: NaiveDate) -> Result<Option<Dataset>>;
}

/// Per-user vendor OAuth state.
#[allow(async_fn_in_trait)]
pub trait CredentialStore {
    async fn list_credentials(&self) -> Result<Vec<Credentials>>;

    async fn get_credentials(&self, user_id: &str) -> Result<Option<Credentials>>;

    /// Persist a refreshed access token. A rotated refresh token replaces the
    /// stored one when present. Returns `false` if no row exists for the user.
    async fn update_access_token(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Weekly report items keyed by `(user_id, report_key)`.
#[allow(async_fn_in_trait)]
pub trait ReportStore {
    async fn put_report(&self, report: &Report) -> Result<()>;

    async fn get_report(&self, user_id: &str, report_key: &str) -> Result<Option<Report>>;
}

/// Read access to registered users.
#[allow(async_fn_in_trait)]
pub trait UserDirectory {
    async fn active_users(&self) -> Result<Vec<UserProfile>>;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory() {
        let db = Database::open_memory().await.unwrap();

        let tables: Vec<String> = db
            .reader()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok::<Vec<String>, rusqlite::Error>(rows.filter_map(|r| r.ok()).collect())
            })
            .await
            .unwrap();

        for table in [
            "app_config",
            "users",
            "cgm_credentials",
            "blobs",
            "glucose_reports",
            "queue_messages",
            "email_outbox",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[tokio::test]
    async fn test_open_at_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("glucopipe.db");
        let db = Database::open_at(&path).await.unwrap();
        assert!(path.exists());

        // Reopening runs migrations again without error.
        drop(db);
        Database::open_at(&path).await.unwrap();
    }

    #[test]
    fn test_migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }
}
