// crates/trialstore-sqlite/src/pool.rs
// ============================================================================
// Module: Connection Pool
// Description: Connection-per-thread pooling for SQLite targets.
// Purpose: Give every calling thread its own connection and manage cleanup.
// Dependencies: rusqlite, tracing, trialstore-core
// ============================================================================

//! ## Overview
//! File databases get one connection per OS thread, reused across calls until
//! the thread releases it or the pool is disposed. In-memory databases exist
//! only inside a single connection, so every thread shares that one.
//!
//! The pool is the only shared mutable resource of a storage instance. It is
//! created by the storage constructor and closed by an explicit dispose.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread;
use std::thread::ThreadId;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::ffi;
use rusqlite::limits::Limit;
use tracing::debug;
use trialstore_core::StorageError;

use crate::store::SqliteJournalMode;
use crate::store::SqliteSyncMode;
use crate::target::SqliteLocation;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Error texts `SQLite` reports when a statement binds too many parameters.
const TOO_MANY_VARIABLES: &[&str] = &["too many SQL variables", "variable number must be between"];

// ============================================================================
// SECTION: Options
// ============================================================================

/// Per-connection settings applied on open.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionOptions {
    /// Busy timeout in milliseconds.
    pub(crate) busy_timeout_ms: u64,
    /// Journal mode pragma.
    pub(crate) journal_mode: SqliteJournalMode,
    /// Synchronous pragma.
    pub(crate) sync_mode: SqliteSyncMode,
    /// Whether to run `SELECT 1` before handing out a connection.
    pub(crate) pre_ping: bool,
    /// Optional cap on bound parameters per statement.
    pub(crate) max_bound_parameters: Option<usize>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Coarse classes of database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DbErrorKind {
    /// Lock contention; the operation may succeed on retry.
    Busy,
    /// Unique or primary-key violation; another writer owns the key.
    UniqueViolation,
    /// Statement exceeded the bound-parameter limit.
    TooManyVariables,
    /// Anything else.
    Other,
}

/// Classifies a driver error.
pub(crate) fn classify_db_error(error: &rusqlite::Error) -> DbErrorKind {
    if let rusqlite::Error::SqliteFailure(failure, message) = error {
        match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => return DbErrorKind::Busy,
            ErrorCode::ConstraintViolation
                if matches!(
                    failure.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                ) =>
            {
                return DbErrorKind::UniqueViolation;
            }
            _ => {}
        }
        if message.as_deref().is_some_and(mentions_too_many_variables) {
            return DbErrorKind::TooManyVariables;
        }
    }
    if mentions_too_many_variables(&error.to_string()) {
        return DbErrorKind::TooManyVariables;
    }
    DbErrorKind::Other
}

/// Returns true when an error message reports a bound-parameter overflow.
fn mentions_too_many_variables(text: &str) -> bool {
    TOO_MANY_VARIABLES.iter().any(|needle| text.contains(needle))
}

/// Maps a driver error into the storage error taxonomy.
pub(crate) fn map_db_error(error: &rusqlite::Error) -> StorageError {
    match classify_db_error(error) {
        DbErrorKind::Busy => StorageError::Transient(error.to_string()),
        DbErrorKind::UniqueViolation => StorageError::Conflict(error.to_string()),
        DbErrorKind::TooManyVariables | DbErrorKind::Other => StorageError::Internal(format!(
            "an error occurred during a storage transaction, typically caused by invalid data \
             such as an oversized value: {error}"
        )),
    }
}

// ============================================================================
// SECTION: Pool
// ============================================================================

/// Shared handle to one pooled connection.
type PooledConnection = Arc<Mutex<Connection>>;

/// Connections currently owned by the pool.
#[derive(Default)]
struct PoolSlots {
    /// Set once the pool is disposed.
    disposed: bool,
    /// The single connection of an in-memory database.
    shared: Option<PooledConnection>,
    /// File-database connections keyed by owning thread.
    per_thread: HashMap<ThreadId, PooledConnection>,
}

/// Connection-per-thread pool.
///
/// # Invariants
/// - A disposed pool never hands out connections again.
/// - In-memory targets have at most one live connection.
pub(crate) struct ConnectionPool {
    /// Database location.
    location: SqliteLocation,
    /// Settings applied to every new connection.
    options: ConnectionOptions,
    /// Pooled connections.
    slots: Mutex<PoolSlots>,
}

impl ConnectionPool {
    /// Opens a pool and eagerly connects once to validate the target.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the database cannot be opened.
    pub(crate) fn open(
        location: SqliteLocation,
        options: ConnectionOptions,
    ) -> Result<Self, StorageError> {
        if let SqliteLocation::File(path) = &location {
            ensure_parent_dir(path)?;
        }
        let pool = Self {
            location,
            options,
            slots: Mutex::new(PoolSlots::default()),
        };
        pool.checkout()?;
        Ok(pool)
    }

    /// Runs `op` with the calling thread's connection.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the pool is disposed, the connection
    /// cannot be (re)opened, or `op` fails.
    pub(crate) fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let pooled = self.checkout()?;
        let mut connection = pooled
            .lock()
            .map_err(|_| StorageError::Internal("sqlite connection mutex poisoned".to_string()))?;
        if self.options.pre_ping
            && matches!(self.location, SqliteLocation::File(_))
            && !is_alive(&connection)
        {
            debug!(location = ?self.location, "pre-ping failed, reopening sqlite connection");
            *connection = open_connection(&self.location, &self.options)?;
        }
        op(&mut connection)
    }

    /// Drops the calling thread's connection.
    ///
    /// Returns true when a connection was released. In-memory targets keep
    /// their shared connection, since closing it would drop the database.
    pub(crate) fn release_current_thread(&self) -> Result<bool, StorageError> {
        if matches!(self.location, SqliteLocation::Memory) {
            return Ok(false);
        }
        let mut slots = self.lock_slots()?;
        Ok(slots.per_thread.remove(&thread::current().id()).is_some())
    }

    /// Closes every pooled connection and rejects later checkouts.
    pub(crate) fn dispose(&self) -> Result<(), StorageError> {
        let mut slots = self.lock_slots()?;
        slots.disposed = true;
        slots.shared = None;
        slots.per_thread.clear();
        Ok(())
    }

    /// Returns the number of live pooled connections.
    pub(crate) fn active_connections(&self) -> Result<usize, StorageError> {
        let slots = self.lock_slots()?;
        Ok(slots.per_thread.len() + usize::from(slots.shared.is_some()))
    }

    /// Returns the calling thread's connection, opening it on first use.
    fn checkout(&self) -> Result<PooledConnection, StorageError> {
        let mut slots = self.lock_slots()?;
        if slots.disposed {
            return Err(StorageError::Internal("storage has been disposed".to_string()));
        }
        if matches!(self.location, SqliteLocation::Memory) {
            if let Some(shared) = &slots.shared {
                return Ok(Arc::clone(shared));
            }
            let shared = Arc::new(Mutex::new(open_connection(&self.location, &self.options)?));
            slots.shared = Some(Arc::clone(&shared));
            return Ok(shared);
        }
        let thread_id = thread::current().id();
        if let Some(existing) = slots.per_thread.get(&thread_id) {
            return Ok(Arc::clone(existing));
        }
        let connection = Arc::new(Mutex::new(open_connection(&self.location, &self.options)?));
        slots.per_thread.insert(thread_id, Arc::clone(&connection));
        Ok(connection)
    }

    /// Locks the slot table.
    fn lock_slots(&self) -> Result<MutexGuard<'_, PoolSlots>, StorageError> {
        self.slots
            .lock()
            .map_err(|_| StorageError::Internal("sqlite pool mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory of a database file exists.
fn ensure_parent_dir(path: &Path) -> Result<(), StorageError> {
    if path.is_dir() {
        return Err(StorageError::Invalid(format!(
            "storage path {} is a directory",
            path.display()
        )));
    }
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|err| StorageError::Internal(format!("failed to create directory: {err}"))),
        _ => Ok(()),
    }
}

/// Opens a connection and applies pragmas and limits.
fn open_connection(
    location: &SqliteLocation,
    options: &ConnectionOptions,
) -> Result<Connection, StorageError> {
    let connection = match location {
        SqliteLocation::Memory => Connection::open_in_memory(),
        SqliteLocation::File(path) => {
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
            Connection::open_with_flags(path, flags)
        }
    }
    .map_err(|err| StorageError::Internal(format!("failed to open sqlite database: {err}")))?;
    apply_pragmas(&connection, options)?;
    Ok(connection)
}

/// Applies pragmas, busy timeout, and the bound-parameter limit.
fn apply_pragmas(connection: &Connection, options: &ConnectionOptions) -> Result<(), StorageError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(|err| map_db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", options.journal_mode.pragma_value()))
        .map_err(|err| map_db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", options.sync_mode.pragma_value()))
        .map_err(|err| map_db_error(&err))?;
    connection
        .busy_timeout(Duration::from_millis(options.busy_timeout_ms))
        .map_err(|err| map_db_error(&err))?;
    if let Some(limit) = options.max_bound_parameters {
        let limit = i32::try_from(limit).map_err(|_| {
            StorageError::Invalid(format!("max_bound_parameters too large: {limit}"))
        })?;
        let _previous = connection.set_limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER, limit);
    }
    Ok(())
}

/// Returns true when the connection answers a trivial query.
fn is_alive(connection: &Connection) -> bool {
    connection.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::expect_used,
        clippy::unwrap_used,
        reason = "Test assertions use expect/unwrap for clarity."
    )]

    use std::sync::Arc;
    use std::thread;

    use tempfile::TempDir;
    use trialstore_core::StorageError;

    use rusqlite::Connection;

    use super::ConnectionOptions;
    use super::ConnectionPool;
    use super::DbErrorKind;
    use super::classify_db_error;
    use super::map_db_error;
    use crate::store::SqliteJournalMode;
    use crate::store::SqliteSyncMode;
    use crate::target::SqliteLocation;

    fn options() -> ConnectionOptions {
        ConnectionOptions {
            busy_timeout_ms: 1_000,
            journal_mode: SqliteJournalMode::Wal,
            sync_mode: SqliteSyncMode::Normal,
            pre_ping: true,
            max_bound_parameters: None,
        }
    }

    #[test]
    fn each_thread_gets_its_own_file_connection() {
        let dir = TempDir::new().unwrap();
        let location = SqliteLocation::File(dir.path().join("pool.db"));
        let pool = Arc::new(ConnectionPool::open(location, options()).unwrap());
        assert_eq!(pool.active_connections().unwrap(), 1);
        let worker = Arc::clone(&pool);
        thread::spawn(move || {
            worker.with_connection(|_| Ok(())).unwrap();
            assert!(worker.release_current_thread().unwrap());
        })
        .join()
        .unwrap();
        assert_eq!(pool.active_connections().unwrap(), 1);
        assert!(pool.release_current_thread().unwrap());
        assert_eq!(pool.active_connections().unwrap(), 0);
    }

    #[test]
    fn memory_connection_is_shared_and_kept() {
        let pool = ConnectionPool::open(SqliteLocation::Memory, options()).unwrap();
        pool.with_connection(|connection| {
            connection.execute_batch("CREATE TABLE probe (id INTEGER);").unwrap();
            Ok(())
        })
        .unwrap();
        assert!(!pool.release_current_thread().unwrap());
        let count = pool
            .with_connection(|connection| {
                Ok(connection
                    .query_row("SELECT COUNT(*) FROM probe", [], |row| row.get::<_, i64>(0))
                    .unwrap())
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn disposed_pool_rejects_checkout() {
        let pool = ConnectionPool::open(SqliteLocation::Memory, options()).unwrap();
        pool.dispose().unwrap();
        assert_eq!(pool.active_connections().unwrap(), 0);
        assert!(matches!(pool.with_connection(|_| Ok(())), Err(StorageError::Internal(_))));
    }

    #[test]
    fn only_unique_violations_map_to_conflict() {
        let connection = Connection::open_in_memory().unwrap();
        connection
            .execute_batch(
                "CREATE TABLE parent (id INTEGER PRIMARY KEY);
                 CREATE TABLE probe (
                     id INTEGER PRIMARY KEY,
                     name TEXT NOT NULL UNIQUE,
                     score REAL NOT NULL CHECK (score >= 0),
                     parent_id INTEGER REFERENCES parent (id)
                 );
                 PRAGMA foreign_keys = ON;
                 INSERT INTO parent (id) VALUES (1);
                 INSERT INTO probe (id, name, score, parent_id) VALUES (1, 'a', 1.0, 1);",
            )
            .unwrap();
        let failures = [
            ("INSERT INTO probe (id, name, score) VALUES (2, 'a', 1.0)", true),
            ("INSERT INTO probe (id, name, score) VALUES (1, 'b', 1.0)", true),
            ("INSERT INTO probe (id, name, score) VALUES (3, 'c', NULL)", false),
            ("INSERT INTO probe (id, name, score) VALUES (4, 'd', -1.0)", false),
            ("INSERT INTO probe (id, name, score, parent_id) VALUES (5, 'e', 1.0, 9)", false),
        ];
        for (sql, is_conflict) in failures {
            let err = connection.execute(sql, []).unwrap_err();
            assert_eq!(
                classify_db_error(&err) == DbErrorKind::UniqueViolation,
                is_conflict,
                "{sql}"
            );
            let mapped = map_db_error(&err);
            if is_conflict {
                assert!(matches!(mapped, StorageError::Conflict(_)), "{sql}");
            } else {
                assert!(matches!(mapped, StorageError::Internal(_)), "{sql}");
            }
        }
    }
}
