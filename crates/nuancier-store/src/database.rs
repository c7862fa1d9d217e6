//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.
//!
//! Every mutating catalog operation runs inside an IMMEDIATE transaction
//! obtained from [`Database::write_tx`]: the write lock is taken before the
//! slug / position checks, so no other writer can claim the same slug between
//! the check and the insert.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/nuancier/nuancier.db`
    /// - macOS:   `~/Library/Application Support/com.nuancier.nuancier/nuancier.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\nuancier\nuancier\data\nuancier.db`
    pub fn new() -> Result<Self> {
        let db_path = default_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        // ON DELETE CASCADE / SET NULL rely on this.
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Reads go straight through the connection; writes should use the
    /// typed helpers, which wrap themselves in [`Database::write_tx`].
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Start an IMMEDIATE transaction.  Dropping it without `commit` rolls
    /// every change back.
    pub(crate) fn write_tx(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

/// Platform default location of `nuancier.db`.
pub fn default_path() -> Result<PathBuf> {
    let project_dirs =
        ProjectDirs::from("com", "nuancier", "nuancier").ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().join("nuancier.db"))
}

// ---------------------------------------------------------------------------
// Row helpers shared by the CRUD modules
// ---------------------------------------------------------------------------

pub(crate) fn parse_timestamp(col: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_column<T>(col: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let (db, _dir) = test_support::open_temp();
        assert!(db.path().is_some());
    }

    #[test]
    fn foreign_keys_enabled() {
        let (db, _dir) = test_support::open_temp();
        let on: i64 = db
            .conn()
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(on, 1);
    }

    #[test]
    fn reopen_keeps_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        drop(Database::open_at(&path).unwrap());
        let db = Database::open_at(&path).unwrap();
        let version: u32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }
}
