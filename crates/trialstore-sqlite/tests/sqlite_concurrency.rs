// crates/trialstore-sqlite/tests/sqlite_concurrency.rs
// ============================================================================
// Module: SQLite Trial Storage Concurrency Tests
// Description: Multi-threaded numbering, naming races, and lock handling.
// Purpose: Validate that concurrent writers get dense trial numbers and that
//          lock timeouts surface as transient errors.
// ============================================================================

//! ## Overview
//! Concurrency tests share one file database across threads. Each worker
//! releases its pooled connection before exiting.

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

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;

use rusqlite::Connection;
use rusqlite::TransactionBehavior;
use tempfile::TempDir;
use trialstore_core::StorageError;
use trialstore_core::TrialState;
use trialstore_core::TrialStorage;
use trialstore_sqlite::SqliteStorageConfig;
use trialstore_sqlite::SqliteTrialStorage;

const WORKERS: usize = 8;
const TRIALS_PER_WORKER: usize = 10;

fn shared_store(dir: &TempDir) -> Arc<SqliteTrialStorage> {
    let url = format!("sqlite:///{}", dir.path().join("shared.db").display());
    Arc::new(SqliteTrialStorage::new(SqliteStorageConfig::new(url)).unwrap())
}

#[test]
fn concurrent_trial_creation_assigns_dense_numbers() {
    let dir = TempDir::new().unwrap();
    let store = shared_store(&dir);
    let experiment = store.create_new_experiment(Some("parallel")).unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0 .. WORKERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut created = Vec::with_capacity(TRIALS_PER_WORKER);
                for _ in 0 .. TRIALS_PER_WORKER {
                    let trial = store.create_new_trial(experiment, None).unwrap();
                    store.set_trial_value(trial, 1.0).unwrap();
                    store.set_trial_state(trial, TrialState::Complete).unwrap();
                    created.push(trial);
                }
                assert!(store.remove_session().unwrap());
                created
            })
        })
        .collect();
    let created: Vec<_> = handles.into_iter().flat_map(|handle| handle.join().unwrap()).collect();

    let total = WORKERS * TRIALS_PER_WORKER;
    assert_eq!(created.len(), total);
    let numbers: BTreeSet<u64> =
        created.iter().map(|trial| store.get_trial_number_from_id(*trial).unwrap()).collect();
    let expected: BTreeSet<u64> = (0 .. total as u64).collect();
    assert_eq!(numbers, expected);
    assert_eq!(store.get_n_trials(experiment, Some(TrialState::Complete)).unwrap(), total as u64);
    assert_eq!(store.active_sessions().unwrap(), 1);
}

#[test]
fn concurrent_creation_of_one_name_has_a_single_winner() {
    let dir = TempDir::new().unwrap();
    let store = shared_store(&dir);
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0 .. WORKERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let result = store.create_new_experiment(Some("contested"));
                store.remove_session().unwrap();
                result
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|result| result.is_err()) {
        assert!(
            matches!(result, Err(StorageError::DuplicateExperimentName(_))),
            "unexpected outcome {result:?}"
        );
    }
}

#[test]
fn held_write_lock_surfaces_as_transient_after_retries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locked.db");
    let mut config = SqliteStorageConfig::new(format!("sqlite:///{}", path.display()));
    config.busy_timeout_ms = 50;
    let store = SqliteTrialStorage::new(config).unwrap();
    let experiment = store.create_new_experiment(None).unwrap();

    let mut blocker = Connection::open(&path).unwrap();
    let lock = blocker.transaction_with_behavior(TransactionBehavior::Immediate).unwrap();
    let err = store.create_new_trial(experiment, None).unwrap_err();
    assert!(err.is_transient(), "unexpected error {err:?}");
    lock.rollback().unwrap();

    let trial = store.create_new_trial(experiment, None).unwrap();
    assert_eq!(store.get_trial_number_from_id(trial).unwrap(), 0);
}

#[test]
fn concurrent_attribute_writes_on_one_key_all_succeed() {
    let dir = TempDir::new().unwrap();
    let store = shared_store(&dir);
    let experiment = store.create_new_experiment(None).unwrap();
    let trial = store.create_new_trial(experiment, None).unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0 .. WORKERS)
        .map(|worker| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.set_trial_user_attr(trial, "owner", &serde_json::json!(worker)).unwrap();
                store.set_trial_intermediate_value(trial, 0, 0.5).unwrap();
                store.remove_session().unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let frozen = store.get_trial(trial).unwrap();
    assert_eq!(frozen.user_attrs.len(), 1);
    assert_eq!(frozen.intermediate_values.len(), 1);
}
