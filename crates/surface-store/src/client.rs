//! SQLite connection management and the shared history store handle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode};
use surface_core::{ScanId, StorageError};

use crate::schema;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite open error at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection lock poisoned")]
    Poisoned,

    #[error("Scan not found: {0}")]
    ScanNotFound(ScanId),
}

impl From<StoreError> for StorageError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Open { .. } | StoreError::Io(_) | StoreError::Poisoned => {
                StorageError::Unavailable(err.to_string())
            }
            StoreError::ScanNotFound(id) => StorageError::ScanNotFound(id),
            StoreError::Sqlite(ref inner) => classify(inner, err.to_string()),
        }
    }
}

fn classify(inner: &rusqlite::Error, message: String) -> StorageError {
    match inner {
        rusqlite::Error::SqliteFailure(code, _) => match code.code {
            ErrorCode::ConstraintViolation => StorageError::Constraint(message),
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::NotADatabase => StorageError::Unavailable(message),
            _ if message.contains("no such table") => StorageError::SchemaMissing(message),
            _ => StorageError::Write(message),
        },
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => StorageError::Corrupt(message),
        _ if message.contains("no such table") => StorageError::SchemaMissing(message),
        _ => StorageError::Write(message),
    }
}

/// Configuration for opening the history database.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Create tables on open. When false a missing schema surfaces as
    /// [`StorageError::SchemaMissing`] on first use.
    pub create_schema: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/surface.db"),
            busy_timeout: Duration::from_secs(5),
            create_schema: true,
        }
    }
}

/// Thread-safe SQLite history store.
///
/// This is the single point of access for all scan history operations.
/// Clone is cheap (inner Arc). Writes are serialized on the connection lock
/// and, across processes, by SQLite's own file locking.
#[derive(Clone)]
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Open (or create) the database at `config.path`.
    pub fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&config.path).map_err(|source| StoreError::Open {
            path: config.path.clone(),
            source,
        })?;
        conn.busy_timeout(config.busy_timeout)?;
        schema::apply_pragmas(&conn)?;
        if config.create_schema {
            schema::initialize(&conn)?;
        }

        tracing::info!(path = %config.path.display(), "Opened history store");
        Ok(Self::from_connection(conn))
    }

    /// Open the database at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::connect(&StoreConfig {
            path: path.as_ref().to_path_buf(),
            ..StoreConfig::default()
        })
    }

    /// Fresh in-memory store with the schema applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::apply_pragmas(&conn)?;
        schema::initialize(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Lock the connection for one operation.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Check the connection answers a trivial query.
    pub fn health_check(&self) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(one == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_errors_map_to_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER NOT NULL UNIQUE); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err();
        let mapped: StorageError = StoreError::Sqlite(err).into();
        assert!(matches!(mapped, StorageError::Constraint(_)));
    }

    #[test]
    fn test_missing_table_maps_to_schema_missing() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.execute("DELETE FROM scans", []).unwrap_err();
        let mapped: StorageError = StoreError::Sqlite(err).into();
        assert!(matches!(mapped, StorageError::SchemaMissing(_)), "{mapped:?}");
    }

    #[test]
    fn test_poisoned_lock_is_unavailable() {
        let mapped: StorageError = StoreError::Poisoned.into();
        assert!(matches!(mapped, StorageError::Unavailable(_)));
    }

    #[test]
    fn test_health_check() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        assert!(store.health_check().unwrap());
    }
}
