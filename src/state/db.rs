// SQLite connection handle and schema setup
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use super::clock::{Clock, SystemClock};
use super::storage::{default_db_path, ensure_parent_dir, StorageError};

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Corrupt data in {location}: {reason}")]
    CorruptData { location: String, reason: String },
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl DbError {
    pub(crate) fn corrupt(location: impl Into<String>, reason: impl ToString) -> Self {
        DbError::CorruptData {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(error: rusqlite::Error) -> Self {
        match error {
            rusqlite::Error::SqliteFailure(err, message)
                if err.code == ErrorCode::ConstraintViolation =>
            {
                DbError::ConstraintViolation(message.unwrap_or_else(|| err.to_string()))
            }
            other => DbError::Sqlite(other),
        }
    }
}

impl From<StorageError> for DbError {
    fn from(error: StorageError) -> Self {
        DbError::StorageUnavailable(error.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Where the database lives
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbLocation {
    File(PathBuf),
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub location: DbLocation,
    /// Upper bound on how long a statement waits for a locked database.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Create missing tables on open. Disable when an external migration
    /// runner owns the schema.
    #[serde(default = "default_create_schema")]
    pub create_schema: bool,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_create_schema() -> bool {
    true
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DbLocation::File(path.into()),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            create_schema: true,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: DbLocation::Memory,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            create_schema: true,
        }
    }

    /// Config pointing at the database in the app data directory
    pub fn at_default_location() -> DbResult<Self> {
        Ok(Self::new(default_db_path()?))
    }
}

enum HandleState {
    Pending,
    Open(Connection),
    Closed,
}

/// Exclusive access to the open connection for the duration of one operation.
pub(crate) type DbGuard<'a> = MappedMutexGuard<'a, Connection>;

/// Process-wide storage handle shared by the store components.
///
/// The connection is opened on first use and lives until [`Database::close`].
/// Every operation holds the connection for its whole duration, so writers
/// are serialized.
#[derive(Clone)]
pub struct Database {
    config: Arc<StoreConfig>,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<HandleState>>,
}

impl Database {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: Arc::new(config),
            clock,
            state: Arc::new(Mutex::new(HandleState::Pending)),
        }
    }

    /// Build a handle and open the connection right away
    pub async fn open(config: StoreConfig) -> DbResult<Self> {
        let db = Self::new(config);
        db.connect().await?;
        Ok(db)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open the connection now instead of on first use
    pub async fn connect(&self) -> DbResult<()> {
        self.lock().await.map(|_| ())
    }

    /// Close the connection. Calling this more than once is fine; every
    /// operation afterwards fails with `StorageUnavailable`.
    pub async fn close(&self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        if let HandleState::Open(conn) = std::mem::replace(&mut *state, HandleState::Closed) {
            conn.close().map_err(|(_, e)| DbError::from(e))?;
            log::info!("Configuration database closed");
        }
        Ok(())
    }

    pub async fn is_closed(&self) -> bool {
        matches!(*self.state.lock().await, HandleState::Closed)
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) async fn lock(&self) -> DbResult<DbGuard<'_>> {
        let mut state = self.state.lock().await;

        if matches!(*state, HandleState::Pending) {
            let conn = open_connection(&self.config).map_err(|e| {
                log::error!("Failed to open configuration database: {}", e);
                e
            })?;
            *state = HandleState::Open(conn);
        }

        MutexGuard::try_map(state, |state| match state {
            HandleState::Open(conn) => Some(conn),
            _ => None,
        })
        .map_err(|_| DbError::StorageUnavailable("configuration database is closed".to_string()))
    }
}

fn open_connection(config: &StoreConfig) -> DbResult<Connection> {
    let conn = match &config.location {
        DbLocation::File(path) => {
            ensure_parent_dir(path)?;
            let conn = Connection::open(path).map_err(|e| {
                DbError::StorageUnavailable(format!("{}: {}", path.display(), e))
            })?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            conn
        }
        DbLocation::Memory => Connection::open_in_memory()
            .map_err(|e| DbError::StorageUnavailable(e.to_string()))?,
    };

    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

    if config.create_schema {
        ensure_schema(&conn)?;
    }

    log::info!("Configuration database opened ({:?})", config.location);
    Ok(conn)
}

pub(crate) fn ensure_schema(conn: &Connection) -> DbResult<()> {
    // Live config, one row per keyboard
    conn.execute(
        "CREATE TABLE IF NOT EXISTS keyboard_configs (
            keyboard_vid INTEGER NOT NULL,
            keyboard_pid INTEGER NOT NULL,
            config_json TEXT NOT NULL,
            selected_profile_id TEXT,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (keyboard_vid, keyboard_pid)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            keyboard_vid INTEGER NOT NULL,
            keyboard_pid INTEGER NOT NULL,
            config_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_profiles_keyboard_updated_at
         ON profiles(keyboard_vid, keyboard_pid, updated_at DESC)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_init() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        // Second run is a no-op
        ensure_schema(&conn).unwrap();

        let table_count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('keyboard_configs', 'profiles')",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(table_count, 2);
    }

    #[test]
    fn test_constraint_failure_maps_to_constraint_violation() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();

        let insert = "INSERT INTO profiles (id, name, keyboard_vid, keyboard_pid, config_json, created_at, updated_at)
                      VALUES ('p1', 'a', 1, 2, '{}', 0, 0)";
        conn.execute(insert, []).unwrap();
        let err = DbError::from(conn.execute(insert, []).unwrap_err());

        assert!(matches!(err, DbError::ConstraintViolation(_)), "got {err:?}");
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"location": {"file": "/tmp/rk.db"}}"#).unwrap();

        assert_eq!(config.location, DbLocation::File(PathBuf::from("/tmp/rk.db")));
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert!(config.create_schema);
    }

    #[tokio::test]
    async fn test_connection_opens_lazily() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("rk.db");
        let db = Database::new(StoreConfig::new(&path));

        assert!(!path.exists());

        db.connect().await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_further_use() {
        let db = Database::open(StoreConfig::in_memory()).await.unwrap();

        db.close().await.unwrap();
        db.close().await.unwrap();

        assert!(db.is_closed().await);
        assert!(matches!(
            db.lock().await.err(),
            Some(DbError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unusable_path_is_storage_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let result = Database::open(StoreConfig::new(blocker.join("rk.db"))).await;

        assert!(matches!(result.err(), Some(DbError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_schema_creation_can_be_disabled() {
        let mut config = StoreConfig::in_memory();
        config.create_schema = false;
        let db = Database::open(config).await.unwrap();

        let conn = db.lock().await.unwrap();
        let table_count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(table_count, 0);
    }
}
