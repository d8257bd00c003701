#![forbid(unsafe_code)]

//! Host registration and up/down event persistence.
//!
//! Lives in the supervisor: the worker is chrooted and never touches
//! the filesystem. Store failures are reported to the caller, logged
//! there, and never escalate into probing behavior.

use crate::Error;
use async_trait::async_trait;
use ipc::ReportedStatus;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::debug;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Ensure a host row exists; safe to call repeatedly.
    async fn register_host(&self, name: &str, address: &str) -> Result<(), Error>;

    /// Append a timestamped state-change record.
    async fn log_event(&self, name: &str, status: ReportedStatus) -> Result<(), Error>;
}

/// Store used when no database is configured.
#[derive(Debug, Default)]
pub struct NoopStore;

#[async_trait]
impl EventStore for NoopStore {
    async fn register_host(&self, _name: &str, _address: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn log_event(&self, _name: &str, _status: ReportedStatus) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the event database at `path`.
    pub async fn open(path: &Path) -> Result<Self, Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self::connect(options).await
    }

    /// Private in-memory database.
    pub async fn in_memory() -> Result<Self, Error> {
        Self::connect(SqliteConnectOptions::new().in_memory(true)).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS hosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                address TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS host_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host_id INTEGER NOT NULL REFERENCES hosts (id),
                event TEXT NOT NULL,
                at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    async fn host_id(&self, name: &str) -> Result<Option<i64>, Error> {
        let row = sqlx::query("SELECT id FROM hosts WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get(0)))
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn register_host(&self, name: &str, address: &str) -> Result<(), Error> {
        sqlx::query("INSERT OR IGNORE INTO hosts (name, address) VALUES (?1, ?2)")
            .bind(name)
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn log_event(&self, name: &str, status: ReportedStatus) -> Result<(), Error> {
        let Some(host_id) = self.host_id(name).await? else {
            debug!(host = name, "event for unregistered host");
            return Ok(());
        };
        let event = match status {
            ReportedStatus::Up => "up",
            ReportedStatus::Down => "down",
        };
        sqlx::query("INSERT INTO host_events (host_id, event) VALUES (?1, ?2)")
            .bind(host_id)
            .bind(event)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn count(store: &SqliteStore, sql: &str) -> i64 {
        sqlx::query(sql)
            .fetch_one(&store.pool)
            .await
            .unwrap()
            .get(0)
    }

    #[tokio::test]
    async fn registration_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.register_host("gw", "192.168.1.1").await.unwrap();
        store.register_host("gw", "192.168.1.1").await.unwrap();
        assert_eq!(count(&store, "SELECT COUNT(*) FROM hosts").await, 1);
    }

    #[tokio::test]
    async fn events_reference_their_host() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.register_host("gw", "192.168.1.1").await.unwrap();
        store.log_event("gw", ReportedStatus::Down).await.unwrap();
        store.log_event("gw", ReportedStatus::Up).await.unwrap();
        assert_eq!(count(&store, "SELECT COUNT(*) FROM host_events").await, 2);

        let row = sqlx::query("SELECT event FROM host_events ORDER BY id LIMIT 1")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let event: String = row.get(0);
        assert_eq!(event, "down");
    }

    #[tokio::test]
    async fn event_for_unknown_host_is_dropped() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.log_event("ghost", ReportedStatus::Up).await.unwrap();
        assert_eq!(count(&store, "SELECT COUNT(*) FROM host_events").await, 0);
    }

    #[tokio::test]
    async fn database_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.sqlite3");
        let store = SqliteStore::open(&path).await.unwrap();
        store.register_host("gw", "192.168.1.1").await.unwrap();
        assert!(path.exists());
    }
}
