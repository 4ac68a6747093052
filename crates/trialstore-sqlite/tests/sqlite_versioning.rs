// crates/trialstore-sqlite/tests/sqlite_versioning.rs
// ============================================================================
// Module: SQLite Schema Versioning Tests
// Description: Revision stamping, compatibility checks, and upgrades.
// Purpose: Validate that legacy databases are detected and migrated in place.
// ============================================================================

//! ## Overview
//! Legacy databases are built from the baseline migration script with an old
//! `version_info` row, then opened, rejected, upgraded, and reopened.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;

use rusqlite::Connection;
use rusqlite::params;
use tempfile::TempDir;
use trialstore_core::ExperimentId;
use trialstore_core::StorageError;
use trialstore_core::TrialId;
use trialstore_core::TrialStorage;
use trialstore_sqlite::SCHEMA_VERSION;
use trialstore_sqlite::SqliteStorageConfig;
use trialstore_sqlite::SqliteTrialStorage;
use trialstore_sqlite::version::BASELINE_REVISION;
use trialstore_sqlite::version::HEAD_REVISION;
use trialstore_sqlite::version::LIBRARY_VERSION;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const BASELINE_SQL: &str = include_str!("../migrations/0001_baseline.sql");

fn url_for(path: &Path) -> String {
    format!("sqlite:///{}", path.display())
}

/// Writes a baseline-era database with two experiments' worth of trials.
fn write_legacy_db(path: &Path) {
    let connection = Connection::open(path).unwrap();
    connection.execute_batch(BASELINE_SQL).unwrap();
    connection
        .execute(
            "INSERT INTO version_info (version_info_id, schema_version, library_version)
             VALUES (1, 1, '0.1.0')",
            [],
        )
        .unwrap();
    connection
        .execute_batch(
            "INSERT INTO experiments (experiment_id, experiment_name) VALUES (1, 'old-a');
             INSERT INTO experiments (experiment_id, experiment_name) VALUES (2, 'old-b');
             INSERT INTO trials (experiment_id, state) VALUES (1, 'COMPLETE');
             INSERT INTO trials (experiment_id, state) VALUES (2, 'COMPLETE');
             INSERT INTO trials (experiment_id, state) VALUES (1, 'RUNNING');",
        )
        .unwrap();
}

fn skip_check(path: &Path) -> SqliteStorageConfig {
    let mut config = SqliteStorageConfig::new(url_for(path));
    config.skip_compatibility_check = true;
    config
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn fresh_database_is_stamped_at_head() {
    let dir = TempDir::new().unwrap();
    let store = SqliteTrialStorage::new(SqliteStorageConfig::new(url_for(
        &dir.path().join("fresh.db"),
    )))
    .unwrap();
    assert_eq!(store.get_current_version().unwrap(), HEAD_REVISION);
    assert_eq!(store.get_head_version(), HEAD_REVISION);
    let all = store.get_all_versions();
    assert_eq!(all.first().map(String::as_str), Some(HEAD_REVISION));
    assert_eq!(all.last().map(String::as_str), Some(BASELINE_REVISION));
    let info = store.version_manager().version_info().unwrap();
    assert_eq!(info.schema_version, SCHEMA_VERSION);
    assert_eq!(info.library_version, LIBRARY_VERSION);
}

#[test]
fn reopening_a_current_database_keeps_data() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reopen.db");
    {
        let store = SqliteTrialStorage::new(SqliteStorageConfig::new(url_for(&path))).unwrap();
        let experiment = store.create_new_experiment(Some("kept")).unwrap();
        store.create_new_trial(experiment, None).unwrap();
        store.dispose().unwrap();
    }
    let store = SqliteTrialStorage::new(SqliteStorageConfig::new(url_for(&path))).unwrap();
    let experiment = store.get_experiment_id_from_name("kept").unwrap();
    assert_eq!(store.get_n_trials(experiment, None).unwrap(), 1);
}

#[test]
fn legacy_database_requires_upgrade() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.db");
    write_legacy_db(&path);

    let err = SqliteTrialStorage::new(SqliteStorageConfig::new(url_for(&path))).err().unwrap();
    match err {
        StorageError::SchemaIncompatible(message) => {
            assert!(message.contains("trialstore storage upgrade"), "{message}");
            assert!(message.contains("0.1.0"), "{message}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn upgrade_backfills_trial_numbers_per_experiment() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.db");
    write_legacy_db(&path);

    let store = SqliteTrialStorage::new(skip_check(&path)).unwrap();
    assert_eq!(store.get_current_version().unwrap(), BASELINE_REVISION);
    store.upgrade().unwrap();
    assert_eq!(store.get_current_version().unwrap(), HEAD_REVISION);
    store.version_manager().check_table_schema_compatibility().unwrap();

    assert_eq!(store.get_trial_number_from_id(TrialId::new(1)).unwrap(), 0);
    assert_eq!(store.get_trial_number_from_id(TrialId::new(2)).unwrap(), 0);
    assert_eq!(store.get_trial_number_from_id(TrialId::new(3)).unwrap(), 1);
    let next = store.create_new_trial(ExperimentId::new(1), None).unwrap();
    assert_eq!(store.get_trial_number_from_id(next).unwrap(), 2);
    store.dispose().unwrap();

    let reopened = SqliteTrialStorage::new(SqliteStorageConfig::new(url_for(&path))).unwrap();
    let info = reopened.version_manager().version_info().unwrap();
    assert_eq!(info.schema_version, SCHEMA_VERSION);
    assert_eq!(reopened.get_all_trials(ExperimentId::new(1), None).unwrap().len(), 3);
}

#[test]
fn unknown_revision_asks_for_a_newer_library() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("future.db");
    drop(SqliteTrialStorage::new(SqliteStorageConfig::new(url_for(&path))).unwrap());
    let connection = Connection::open(&path).unwrap();
    connection
        .execute("UPDATE migration_revision SET revision = ?1", params!["9999_future"])
        .unwrap();
    drop(connection);

    let err = SqliteTrialStorage::new(SqliteStorageConfig::new(url_for(&path))).err().unwrap();
    match err {
        StorageError::SchemaIncompatible(message) => {
            assert!(message.contains("upgrade trialstore to the latest version"), "{message}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn migration_config_points_at_bundled_scripts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cfg%20.db");
    let store = SqliteTrialStorage::new(SqliteStorageConfig::new(url_for(&path))).unwrap();
    let config = store.migration_config();
    assert!(config.script_location.ends_with("migrations"));
    assert!(config.url.contains("cfg%%20.db"));
    let ini = config.to_ini();
    assert!(ini.starts_with("[trialstore]\n"));
    assert!(ini.contains("script_location = "));
}
