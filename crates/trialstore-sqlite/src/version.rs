// crates/trialstore-sqlite/src/version.rs
// ============================================================================
// Module: Version Manager
// Description: Schema version bootstrap, compatibility checks, and upgrades.
// Purpose: Keep a database and the running library on the same schema.
// Dependencies: rusqlite, serde, tracing, trialstore-core
// ============================================================================

//! ## Overview
//! Two records describe the persisted schema:
//! - `version_info`: a singleton with the schema version and the library
//!   version that created the database.
//! - `migration_revision`: the id of the last applied migration script.
//!
//! Migration scripts are compiled into the crate as an ordered revision
//! chain. A database that predates revision tracking is stamped with the
//! baseline revision and must be upgraded before it can be used.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::sync::Arc;

use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Serialize;
use tracing::info;
use trialstore_core::StorageError;

use crate::pool::ConnectionPool;
use crate::pool::map_db_error;
use crate::schema::SCHEMA_VERSION;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Library version recorded in `version_info`.
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Revision stamped on databases created before revision tracking.
pub const BASELINE_REVISION: &str = "0001_baseline";
/// Newest known revision.
pub const HEAD_REVISION: &str = "0003_trial_state_index";
/// Directory holding the migration scripts.
const SCRIPT_LOCATION: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/migrations");
/// Revision marker table.
const MARKER_DDL: &str = "CREATE TABLE IF NOT EXISTS migration_revision (
    marker_id INTEGER PRIMARY KEY CHECK (marker_id = 1),
    revision TEXT NOT NULL
);";

// ============================================================================
// SECTION: Revisions
// ============================================================================

/// One migration script in the revision chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    /// Revision identifier.
    pub id: &'static str,
    /// Revision this one upgrades from.
    pub down_revision: Option<&'static str>,
    /// SQL applied when upgrading to this revision.
    pub sql: &'static str,
}

/// Known revisions, oldest first.
pub const REVISIONS: &[Revision] = &[
    Revision {
        id: BASELINE_REVISION,
        down_revision: None,
        sql: include_str!("../migrations/0001_baseline.sql"),
    },
    Revision {
        id: "0002_trial_number",
        down_revision: Some(BASELINE_REVISION),
        sql: include_str!("../migrations/0002_trial_number.sql"),
    },
    Revision {
        id: HEAD_REVISION,
        down_revision: Some("0002_trial_number"),
        sql: include_str!("../migrations/0003_trial_state_index.sql"),
    },
];

// ============================================================================
// SECTION: Version Info
// ============================================================================

/// Contents of the `version_info` singleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    /// Schema version the database was created or last upgraded with.
    pub schema_version: i64,
    /// Library version that created or last upgraded the database.
    pub library_version: String,
}

// ============================================================================
// SECTION: Migration Config
// ============================================================================

/// Generated migration settings for external migration tooling.
///
/// # Invariants
/// - Every `%` in the values is escaped as `%%`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationConfig {
    /// Directory containing the revision scripts.
    pub script_location: String,
    /// Connection string of the managed database.
    pub url: String,
}

impl MigrationConfig {
    /// Builds a config for a connection string, escaping interpolation marks.
    #[must_use]
    pub fn new(script_location: &str, url: &str) -> Self {
        Self {
            script_location: escape_percent(script_location),
            url: escape_percent(url),
        }
    }

    /// Renders the config as an INI section.
    #[must_use]
    pub fn to_ini(&self) -> String {
        let mut out = String::from("[trialstore]\n");
        let _ = writeln!(out, "script_location = {}", self.script_location);
        let _ = writeln!(out, "url = {}", self.url);
        out
    }
}

/// Escapes `%` for interpolating config parsers.
fn escape_percent(value: &str) -> String {
    value.replace('%', "%%")
}

// ============================================================================
// SECTION: Version Manager
// ============================================================================

/// Schema version bootstrap and migration driver.
pub struct VersionManager {
    /// Pool shared with the storage engine.
    pool: Arc<ConnectionPool>,
    /// Connection string used for generated migration config.
    url: String,
}

impl VersionManager {
    /// Ensures `version_info` and the revision marker exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the bootstrap transaction fails.
    pub(crate) fn new(pool: Arc<ConnectionPool>, url: String) -> Result<Self, StorageError> {
        let manager = Self {
            pool,
            url,
        };
        manager.bootstrap()?;
        Ok(manager)
    }

    /// Creates missing version records in one write transaction.
    fn bootstrap(&self) -> Result<(), StorageError> {
        self.pool.with_connection(|connection| {
            let tx = connection
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| map_db_error(&err))?;
            tx.execute_batch(MARKER_DDL).map_err(|err| map_db_error(&err))?;
            let schema_version = match read_version_info(&tx)? {
                Some(existing) => existing.schema_version,
                None => {
                    tx.execute(
                        "INSERT INTO version_info (version_info_id, schema_version, \
                         library_version) VALUES (1, ?1, ?2)",
                        params![SCHEMA_VERSION, LIBRARY_VERSION],
                    )
                    .map_err(|err| map_db_error(&err))?;
                    SCHEMA_VERSION
                }
            };
            if read_marker(&tx)?.is_none() {
                let stamp =
                    if schema_version == SCHEMA_VERSION { HEAD_REVISION } else { BASELINE_REVISION };
                write_marker(&tx, stamp)?;
                info!(revision = stamp, schema_version, "stamped storage revision");
            }
            tx.commit().map_err(|err| map_db_error(&err))
        })
    }

    /// Verifies the applied revision is the head revision.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SchemaIncompatible`] when the revisions differ;
    /// the message says whether an upgrade command or a newer library is needed.
    pub fn check_table_schema_compatibility(&self) -> Result<(), StorageError> {
        let current = self.get_current_version()?;
        let head = self.get_head_version();
        if current == head {
            return Ok(());
        }
        let created_by = self.version_info()?.library_version;
        let mut message = format!(
            "the runtime trialstore version {LIBRARY_VERSION} is no longer compatible with the \
             table schema (set up by trialstore {created_by}, revision {current}). "
        );
        if self.get_all_versions().contains(&current) {
            message.push_str(
                "Please execute `trialstore storage upgrade --storage <URL>` to upgrade the storage.",
            );
        } else {
            message.push_str("Please upgrade trialstore to the latest version.");
        }
        Err(StorageError::SchemaIncompatible(message))
    }

    /// Applies every revision after the current one, up to head.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SchemaIncompatible`] for an unknown current
    /// revision and the script failure otherwise; nothing is applied on error.
    pub fn upgrade(&self) -> Result<(), StorageError> {
        self.pool.with_connection(|connection| {
            let tx = connection
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| map_db_error(&err))?;
            let current = read_marker(&tx)?.ok_or_else(|| {
                StorageError::Internal("storage revision marker is missing".to_string())
            })?;
            let position =
                REVISIONS.iter().position(|revision| revision.id == current).ok_or_else(|| {
                    StorageError::SchemaIncompatible(format!(
                        "unknown storage revision {current}; upgrade trialstore to the latest \
                         version"
                    ))
                })?;
            for revision in REVISIONS.iter().skip(position + 1) {
                tx.execute_batch(revision.sql).map_err(|err| {
                    StorageError::Internal(format!("migration {} failed: {err}", revision.id))
                })?;
                write_marker(&tx, revision.id)?;
                info!(revision = revision.id, "applied storage migration");
            }
            tx.execute(
                "UPDATE version_info SET schema_version = ?1, library_version = ?2",
                params![SCHEMA_VERSION, LIBRARY_VERSION],
            )
            .map_err(|err| map_db_error(&err))?;
            tx.commit().map_err(|err| map_db_error(&err))
        })
    }

    /// Returns the applied revision.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the marker cannot be read.
    pub fn get_current_version(&self) -> Result<String, StorageError> {
        self.pool.with_connection(|connection| {
            let tx = connection.transaction().map_err(|err| map_db_error(&err))?;
            let current = read_marker(&tx)?.ok_or_else(|| {
                StorageError::Internal("storage revision marker is missing".to_string())
            })?;
            tx.commit().map_err(|err| map_db_error(&err))?;
            Ok(current)
        })
    }

    /// Returns the newest known revision.
    #[must_use]
    pub fn get_head_version(&self) -> String {
        HEAD_REVISION.to_string()
    }

    /// Returns every known revision, newest first.
    #[must_use]
    pub fn get_all_versions(&self) -> Vec<String> {
        REVISIONS.iter().rev().map(|revision| revision.id.to_string()).collect()
    }

    /// Returns the `version_info` singleton.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the row is missing or unreadable.
    pub fn version_info(&self) -> Result<VersionInfo, StorageError> {
        self.pool.with_connection(|connection| {
            let tx = connection.transaction().map_err(|err| map_db_error(&err))?;
            let info = read_version_info(&tx)?.ok_or_else(|| {
                StorageError::Internal("version_info row is missing".to_string())
            })?;
            tx.commit().map_err(|err| map_db_error(&err))?;
            Ok(info)
        })
    }

    /// Returns the generated migration configuration.
    #[must_use]
    pub fn migration_config(&self) -> MigrationConfig {
        MigrationConfig::new(SCRIPT_LOCATION, &self.url)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads the `version_info` singleton if present.
fn read_version_info(tx: &Transaction<'_>) -> Result<Option<VersionInfo>, StorageError> {
    tx.query_row("SELECT schema_version, library_version FROM version_info LIMIT 1", [], |row| {
        Ok(VersionInfo {
            schema_version: row.get(0)?,
            library_version: row.get(1)?,
        })
    })
    .optional()
    .map_err(|err| map_db_error(&err))
}

/// Reads the applied revision if stamped.
fn read_marker(tx: &Transaction<'_>) -> Result<Option<String>, StorageError> {
    tx.query_row("SELECT revision FROM migration_revision LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|err| map_db_error(&err))
}

/// Stamps the applied revision.
fn write_marker(tx: &Transaction<'_>, revision: &str) -> Result<(), StorageError> {
    tx.execute(
        "INSERT INTO migration_revision (marker_id, revision) VALUES (1, ?1)
         ON CONFLICT(marker_id) DO UPDATE SET revision = excluded.revision",
        params![revision],
    )
    .map_err(|err| map_db_error(&err))?;
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
