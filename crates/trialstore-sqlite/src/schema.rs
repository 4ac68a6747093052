// crates/trialstore-sqlite/src/schema.rs
// ============================================================================
// Module: Trialstore Schema
// Description: Table layout for experiments, trials, and their child rows.
// Purpose: Create the relational model on first use of a database.
// Dependencies: rusqlite, trialstore-core
// ============================================================================

//! ## Overview
//! Ownership is expressed with foreign keys that cascade on delete: removing
//! an experiment removes its attributes and trials, and removing a trial
//! removes its parameters, intermediate values, and attributes.
//!
//! Attribute values are JSON text. Timestamps are unix epoch milliseconds.
//! `SQLite` stores NaN as NULL, so non-finite objective values read back as
//! missing (trial value) or NaN (intermediate value).

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use trialstore_core::StorageError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version compiled into this library.
pub const SCHEMA_VERSION: i64 = 3;

/// Head table layout. Every statement is idempotent.
const TABLES_DDL: &str = "
CREATE TABLE IF NOT EXISTS experiments (
    experiment_id INTEGER PRIMARY KEY AUTOINCREMENT,
    experiment_name TEXT NOT NULL UNIQUE,
    direction TEXT NOT NULL DEFAULT 'NOT_SET'
);
CREATE TABLE IF NOT EXISTS experiment_user_attributes (
    experiment_user_attribute_id INTEGER PRIMARY KEY AUTOINCREMENT,
    experiment_id INTEGER NOT NULL
        REFERENCES experiments (experiment_id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value_json TEXT NOT NULL,
    UNIQUE (experiment_id, key)
);
CREATE TABLE IF NOT EXISTS experiment_system_attributes (
    experiment_system_attribute_id INTEGER PRIMARY KEY AUTOINCREMENT,
    experiment_id INTEGER NOT NULL
        REFERENCES experiments (experiment_id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value_json TEXT NOT NULL,
    UNIQUE (experiment_id, key)
);
CREATE TABLE IF NOT EXISTS trials (
    trial_id INTEGER PRIMARY KEY AUTOINCREMENT,
    number INTEGER,
    experiment_id INTEGER NOT NULL
        REFERENCES experiments (experiment_id) ON DELETE CASCADE,
    state TEXT NOT NULL,
    value REAL,
    datetime_start INTEGER,
    datetime_complete INTEGER
);
CREATE TABLE IF NOT EXISTS trial_params (
    param_id INTEGER PRIMARY KEY AUTOINCREMENT,
    trial_id INTEGER NOT NULL REFERENCES trials (trial_id) ON DELETE CASCADE,
    param_name TEXT NOT NULL,
    param_value REAL NOT NULL,
    distribution_json TEXT NOT NULL,
    UNIQUE (trial_id, param_name)
);
CREATE TABLE IF NOT EXISTS trial_values (
    trial_value_id INTEGER PRIMARY KEY AUTOINCREMENT,
    trial_id INTEGER NOT NULL REFERENCES trials (trial_id) ON DELETE CASCADE,
    step INTEGER NOT NULL,
    value REAL,
    UNIQUE (trial_id, step)
);
CREATE TABLE IF NOT EXISTS trial_user_attributes (
    trial_user_attribute_id INTEGER PRIMARY KEY AUTOINCREMENT,
    trial_id INTEGER NOT NULL REFERENCES trials (trial_id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value_json TEXT NOT NULL,
    UNIQUE (trial_id, key)
);
CREATE TABLE IF NOT EXISTS trial_system_attributes (
    trial_system_attribute_id INTEGER PRIMARY KEY AUTOINCREMENT,
    trial_id INTEGER NOT NULL REFERENCES trials (trial_id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value_json TEXT NOT NULL,
    UNIQUE (trial_id, key)
);
CREATE TABLE IF NOT EXISTS version_info (
    version_info_id INTEGER PRIMARY KEY CHECK (version_info_id = 1),
    schema_version INTEGER NOT NULL,
    library_version TEXT NOT NULL
);
";

/// Indexes introduced after the baseline revision.
///
/// Only applied to fresh databases; existing ones receive them through the
/// migration scripts, since the indexed columns may not exist yet.
const HEAD_INDEXES_DDL: &str = "
CREATE INDEX IF NOT EXISTS ix_trials_experiment_number ON trials (experiment_id, number);
CREATE INDEX IF NOT EXISTS ix_trials_experiment_state ON trials (experiment_id, state);
";

// ============================================================================
// SECTION: Creation
// ============================================================================

/// Creates any missing tables and reports whether the database was fresh.
///
/// # Errors
///
/// Returns [`StorageError::Internal`] when DDL execution fails.
pub(crate) fn create_all(connection: &Connection) -> Result<bool, StorageError> {
    let fresh = !table_exists(connection, "version_info")?;
    connection.execute_batch(TABLES_DDL).map_err(|err| {
        StorageError::Internal(format!("failed to create storage tables: {err}"))
    })?;
    if fresh {
        connection.execute_batch(HEAD_INDEXES_DDL).map_err(|err| {
            StorageError::Internal(format!("failed to create storage indexes: {err}"))
        })?;
    }
    Ok(fresh)
}

/// Returns true when a table with the given name exists.
///
/// # Errors
///
/// Returns [`StorageError::Internal`] when the catalog query fails.
pub(crate) fn table_exists(connection: &Connection, table: &str) -> Result<bool, StorageError> {
    connection
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(|err| StorageError::Internal(format!("failed to inspect schema: {err}")))
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

    use rusqlite::Connection;

    use super::create_all;
    use super::table_exists;

    #[test]
    fn create_all_is_idempotent_and_reports_freshness() {
        let connection = Connection::open_in_memory().unwrap();
        assert!(create_all(&connection).unwrap());
        assert!(!create_all(&connection).unwrap());
        for table in ["experiments", "trials", "trial_params", "trial_values", "version_info"] {
            assert!(table_exists(&connection, table).unwrap(), "{table} missing");
        }
    }
}
