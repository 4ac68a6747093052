// crates/trialstore-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Trial Storage
// Description: TrialStorage backed by SQLite with per-call transactions.
// Purpose: Persist experiments and trials with race-free trial numbering.
// Dependencies: rusqlite, serde, serde_json, tracing, trialstore-core, uuid
// ============================================================================

//! ## Overview
//! [`SqliteTrialStorage`] implements [`TrialStorage`] on top of the schema in
//! [`crate::schema`]. Every public call runs exactly one transaction on the
//! calling thread's pooled connection and commits it, reads included.
//!
//! Writes use `BEGIN IMMEDIATE`, which takes the database write lock up front.
//! That lock serializes trial-number assignment and the first write of a
//! parameter name within an experiment. Lock timeouts surface as
//! [`StorageError::Transient`]; only trial creation retries them.
//!
//! Attribute, parameter, and intermediate-value upserts treat a
//! unique-key race on commit as a no-op: another writer already stored a row
//! for the same key. Every other constraint failure is an error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use rusqlite::params_from_iter;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::info;
use tracing::warn;
use trialstore_core::Distribution;
use trialstore_core::ExperimentDirection;
use trialstore_core::ExperimentId;
use trialstore_core::ExperimentSummary;
use trialstore_core::FrozenTrial;
use trialstore_core::StorageError;
use trialstore_core::Timestamp;
use trialstore_core::TrialId;
use trialstore_core::TrialState;
use trialstore_core::TrialStorage;
use trialstore_core::distributions::check_distribution_compatibility;
use trialstore_core::distributions::distribution_to_json;
use trialstore_core::distributions::json_to_distribution;
use uuid::Uuid;

use crate::pool::ConnectionOptions;
use crate::pool::ConnectionPool;
use crate::pool::DbErrorKind;
use crate::pool::classify_db_error;
use crate::pool::map_db_error;
use crate::schema::create_all;
use crate::target::ConnectionTarget;
use crate::version::MigrationConfig;
use crate::version::VersionManager;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Smallest accepted bound-parameter limit; single-row statements bind fewer.
pub const MIN_BOUND_PARAMETERS: usize = 8;
/// Total attempts made by trial creation on transient failures.
pub const MAX_CREATE_TRIAL_ATTEMPTS: u32 = 3;
/// Prefix of generated experiment names.
pub const DEFAULT_EXPERIMENT_NAME_PREFIX: &str = "no-name-";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode.
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode.
    #[default]
    Full,
    /// Normal synchronous mode.
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for [`SqliteTrialStorage`].
///
/// # Invariants
/// - `url` may contain `{SCHEMA_VERSION}`, substituted before connecting.
/// - `max_bound_parameters`, when set, is at least [`MIN_BOUND_PARAMETERS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteStorageConfig {
    /// Connection string, e.g. `sqlite:///trials.db`.
    pub url: String,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Connection check on checkout; unset picks the dialect default.
    #[serde(default)]
    pub pre_ping: Option<bool>,
    /// Optional cap on bound parameters per statement.
    #[serde(default)]
    pub max_bound_parameters: Option<usize>,
    /// Skips the schema compatibility check at construction.
    #[serde(default)]
    pub skip_compatibility_check: bool,
}

impl SqliteStorageConfig {
    /// Builds a config with defaults for everything but the URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            pre_ping: None,
            max_bound_parameters: None,
            skip_compatibility_check: false,
        }
    }

    /// Validates limits that are independent of the connection target.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.url.trim().is_empty() {
            return Err(StorageError::Invalid("storage url must not be empty".to_string()));
        }
        if let Some(limit) = self.max_bound_parameters
            && limit < MIN_BOUND_PARAMETERS
        {
            return Err(StorageError::Invalid(format!(
                "max_bound_parameters must be at least {MIN_BOUND_PARAMETERS} (got {limit})"
            )));
        }
        Ok(())
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed experiment and trial storage.
///
/// # Invariants
/// - No entity state is cached; every read runs a fresh query.
/// - After [`SqliteTrialStorage::dispose`] every operation fails.
pub struct SqliteTrialStorage {
    /// Parsed connection target.
    target: ConnectionTarget,
    /// Connection-per-thread pool shared with the version manager.
    pool: Arc<ConnectionPool>,
    /// Schema version bootstrap and migrations.
    version_manager: VersionManager,
}

impl SqliteTrialStorage {
    /// Opens storage, creating tables and checking schema compatibility.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MissingDriver`] for targets without a bundled
    /// driver, [`StorageError::SchemaIncompatible`] when the schema is out of
    /// date (unless the check is skipped), and other [`StorageError`] values
    /// when the database cannot be opened.
    pub fn new(config: SqliteStorageConfig) -> Result<Self, StorageError> {
        config.validate()?;
        let target = ConnectionTarget::parse(&config.url)?;
        let pre_ping = config.pre_ping.unwrap_or_else(|| target.requires_pre_ping());
        let location = target.sqlite_location()?;
        let options = ConnectionOptions {
            busy_timeout_ms: config.busy_timeout_ms,
            journal_mode: config.journal_mode,
            sync_mode: config.sync_mode,
            pre_ping,
            max_bound_parameters: config.max_bound_parameters,
        };
        let pool = Arc::new(ConnectionPool::open(location, options)?);
        pool.with_connection(|connection| {
            let tx = connection
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| map_db_error(&err))?;
            create_all(&tx)?;
            tx.commit().map_err(|err| map_db_error(&err))
        })?;
        let version_manager = VersionManager::new(Arc::clone(&pool), target.url().to_string())?;
        if !config.skip_compatibility_check {
            version_manager.check_table_schema_compatibility()?;
        }
        Ok(Self {
            target,
            pool,
            version_manager,
        })
    }

    /// Returns the connection string after placeholder substitution.
    #[must_use]
    pub fn url(&self) -> &str {
        self.target.url()
    }

    /// Returns the version manager.
    #[must_use]
    pub const fn version_manager(&self) -> &VersionManager {
        &self.version_manager
    }

    /// Upgrades the schema to the head revision.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when a migration fails.
    pub fn upgrade(&self) -> Result<(), StorageError> {
        self.version_manager.upgrade()
    }

    /// Returns the applied schema revision.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the marker cannot be read.
    pub fn get_current_version(&self) -> Result<String, StorageError> {
        self.version_manager.get_current_version()
    }

    /// Returns the newest known schema revision.
    #[must_use]
    pub fn get_head_version(&self) -> String {
        self.version_manager.get_head_version()
    }

    /// Returns every known schema revision, newest first.
    #[must_use]
    pub fn get_all_versions(&self) -> Vec<String> {
        self.version_manager.get_all_versions()
    }

    /// Returns the generated migration configuration.
    #[must_use]
    pub fn migration_config(&self) -> MigrationConfig {
        self.version_manager.migration_config()
    }

    /// Releases the calling thread's connection.
    ///
    /// Threads other than the one that created the storage should call this
    /// before exiting. Returns true when a connection was released.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] when the pool lock is poisoned.
    pub fn remove_session(&self) -> Result<bool, StorageError> {
        self.pool.release_current_thread()
    }

    /// Closes every pooled connection. Later calls fail.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] when the pool lock is poisoned.
    pub fn dispose(&self) -> Result<(), StorageError> {
        self.pool.dispose()?;
        debug!(url = self.target.url(), "disposed trial storage");
        Ok(())
    }

    /// Returns the number of open pooled connections.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] when the pool lock is poisoned.
    pub fn active_sessions(&self) -> Result<usize, StorageError> {
        self.pool.active_connections()
    }

    /// Runs `op` in a deferred transaction and commits it.
    fn read<T>(
        &self,
        op: impl FnOnce(&Transaction<'_>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.transact(TransactionBehavior::Deferred, op)
    }

    /// Runs `op` in an immediate (write-locked) transaction and commits it.
    fn write<T>(
        &self,
        op: impl FnOnce(&Transaction<'_>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.transact(TransactionBehavior::Immediate, op)
    }

    /// Runs a write, treating a unique-key conflict as an applied no-op.
    fn write_ignoring_conflict(
        &self,
        operation: &str,
        op: impl FnOnce(&Transaction<'_>) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        match self.write(op) {
            Err(StorageError::Conflict(message)) => {
                debug!(
                    operation,
                    %message,
                    "ignoring unique-key race; another writer committed a row with the same key"
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Opens one transaction on the calling thread's connection.
    fn transact<T>(
        &self,
        behavior: TransactionBehavior,
        op: impl FnOnce(&Transaction<'_>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.pool.with_connection(|connection| {
            let tx =
                connection.transaction_with_behavior(behavior).map_err(|err| map_db_error(&err))?;
            let value = op(&tx)?;
            tx.commit().map_err(|err| map_db_error(&err))?;
            Ok(value)
        })
    }

    /// Generates an experiment name that no stored experiment uses.
    fn generate_unique_name(&self) -> Result<String, StorageError> {
        loop {
            let candidate = format!("{DEFAULT_EXPERIMENT_NAME_PREFIX}{}", Uuid::new_v4());
            let taken = self.read(|tx| find_experiment_by_name(tx, &candidate))?.is_some();
            if !taken {
                return Ok(candidate);
            }
        }
    }
}

impl TrialStorage for SqliteTrialStorage {
    fn create_new_experiment(&self, name: Option<&str>) -> Result<ExperimentId, StorageError> {
        let name = match name {
            Some(name) if name.is_empty() => {
                return Err(StorageError::InvalidArgument(
                    "experiment name must not be empty".to_string(),
                ));
            }
            Some(name) => name.to_string(),
            None => self.generate_unique_name()?,
        };
        let created = self.write(|tx| {
            tx.execute(
                "INSERT INTO experiments (experiment_name, direction) VALUES (?1, ?2)",
                params![name, ExperimentDirection::NotSet.as_str()],
            )
            .map_err(|err| map_db_error(&err))?;
            Ok(tx.last_insert_rowid())
        });
        match created {
            Ok(experiment_id) => {
                info!(experiment = %name, experiment_id, "created experiment");
                Ok(ExperimentId::new(experiment_id))
            }
            Err(StorageError::Conflict(_)) => Err(StorageError::DuplicateExperimentName(format!(
                "another experiment with name '{name}' already exists; choose a different name \
                 or load the existing one"
            ))),
            Err(err) => Err(err),
        }
    }

    fn delete_experiment(&self, experiment_id: ExperimentId) -> Result<(), StorageError> {
        self.write(|tx| {
            ensure_experiment_exists(tx, experiment_id)?;
            tx.execute("DELETE FROM experiments WHERE experiment_id = ?1", params![
                experiment_id.get()
            ])
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })?;
        info!(experiment_id = experiment_id.get(), "deleted experiment");
        Ok(())
    }

    fn set_experiment_direction(
        &self,
        experiment_id: ExperimentId,
        direction: ExperimentDirection,
    ) -> Result<(), StorageError> {
        self.write(|tx| {
            let current = read_direction(tx, experiment_id)?;
            if current != ExperimentDirection::NotSet && current != direction {
                return Err(StorageError::InvalidStateTransition(format!(
                    "cannot overwrite direction of experiment {experiment_id} from {current} to \
                     {direction}"
                )));
            }
            tx.execute("UPDATE experiments SET direction = ?1 WHERE experiment_id = ?2", params![
                direction.as_str(),
                experiment_id.get()
            ])
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })
    }

    fn set_experiment_user_attr(
        &self,
        experiment_id: ExperimentId,
        key: &str,
        value: &Value,
    ) -> Result<(), StorageError> {
        let value_json = encode_json(value)?;
        self.write_ignoring_conflict("set_experiment_user_attr", |tx| {
            ensure_experiment_exists(tx, experiment_id)?;
            upsert_attrs(tx, AttrTable::ExperimentUser, experiment_id.get(), &[(key, value_json)])
        })
    }

    fn set_experiment_system_attr(
        &self,
        experiment_id: ExperimentId,
        key: &str,
        value: &Value,
    ) -> Result<(), StorageError> {
        let value_json = encode_json(value)?;
        self.write_ignoring_conflict("set_experiment_system_attr", |tx| {
            ensure_experiment_exists(tx, experiment_id)?;
            upsert_attrs(tx, AttrTable::ExperimentSystem, experiment_id.get(), &[(key, value_json)])
        })
    }

    fn get_experiment_id_from_name(&self, name: &str) -> Result<ExperimentId, StorageError> {
        self.read(|tx| find_experiment_by_name(tx, name))?
            .map(ExperimentId::new)
            .ok_or_else(|| StorageError::NotFound(format!("no experiment named '{name}'")))
    }

    fn get_experiment_id_from_trial_id(
        &self,
        trial_id: TrialId,
    ) -> Result<ExperimentId, StorageError> {
        self.read(|tx| load_trial_header(tx, trial_id)).map(|header| header.experiment_id)
    }

    fn get_experiment_name(&self, experiment_id: ExperimentId) -> Result<String, StorageError> {
        self.read(|tx| {
            tx.query_row(
                "SELECT experiment_name FROM experiments WHERE experiment_id = ?1",
                params![experiment_id.get()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| map_db_error(&err))?
            .ok_or_else(|| experiment_not_found(experiment_id))
        })
    }

    fn get_experiment_direction(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<ExperimentDirection, StorageError> {
        self.read(|tx| read_direction(tx, experiment_id))
    }

    fn get_experiment_user_attrs(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<BTreeMap<String, Value>, StorageError> {
        self.read(|tx| {
            ensure_experiment_exists(tx, experiment_id)?;
            read_attrs(tx, AttrTable::ExperimentUser, experiment_id.get())
        })
    }

    fn get_experiment_system_attrs(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<BTreeMap<String, Value>, StorageError> {
        self.read(|tx| {
            ensure_experiment_exists(tx, experiment_id)?;
            read_attrs(tx, AttrTable::ExperimentSystem, experiment_id.get())
        })
    }

    fn get_all_experiment_summaries(&self) -> Result<Vec<ExperimentSummary>, StorageError> {
        self.read(|tx| {
            let rows = {
                let mut statement = tx
                    .prepare(
                        "SELECT e.experiment_id, e.experiment_name, e.direction,
                                MIN(t.datetime_start), COUNT(t.trial_id)
                         FROM experiments AS e
                         LEFT OUTER JOIN trials AS t ON t.experiment_id = e.experiment_id
                         GROUP BY e.experiment_id, e.experiment_name, e.direction
                         ORDER BY e.experiment_id",
                    )
                    .map_err(|err| map_db_error(&err))?;
                let mapped = statement
                    .query_map([], |row| {
                        Ok(SummaryRow {
                            experiment_id: row.get(0)?,
                            name: row.get(1)?,
                            direction: row.get(2)?,
                            datetime_start: row.get(3)?,
                            n_trials: row.get(4)?,
                        })
                    })
                    .map_err(|err| map_db_error(&err))?;
                mapped.collect::<rusqlite::Result<Vec<_>>>().map_err(|err| map_db_error(&err))?
            };
            let mut summaries = Vec::with_capacity(rows.len());
            for row in rows {
                let experiment_id = ExperimentId::new(row.experiment_id);
                let direction = parse_direction(&row.direction)?;
                let best_trial = match best_trial_in_tx(tx, experiment_id, direction) {
                    Ok(trial) => Some(trial),
                    Err(StorageError::NotFound(_)) => None,
                    Err(err) => return Err(err),
                };
                summaries.push(ExperimentSummary {
                    experiment_id,
                    name: row.name,
                    direction,
                    best_trial,
                    user_attrs: read_attrs(tx, AttrTable::ExperimentUser, row.experiment_id)?,
                    system_attrs: read_attrs(tx, AttrTable::ExperimentSystem, row.experiment_id)?,
                    n_trials: to_u64(row.n_trials, "trial count")?,
                    datetime_start: row.datetime_start.map(Timestamp::from_unix_millis),
                });
            }
            Ok(summaries)
        })
    }

    fn create_new_trial(
        &self,
        experiment_id: ExperimentId,
        template: Option<&FrozenTrial>,
    ) -> Result<TrialId, StorageError> {
        let mut attempt = 1;
        loop {
            match self.write(|tx| create_trial_in_tx(tx, experiment_id, template)) {
                Err(err) if err.is_transient() && attempt < MAX_CREATE_TRIAL_ATTEMPTS => {
                    warn!(
                        experiment_id = experiment_id.get(),
                        attempt,
                        error = %err,
                        "transient failure creating trial, retrying"
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn set_trial_state(&self, trial_id: TrialId, state: TrialState) -> Result<bool, StorageError> {
        self.write(|tx| {
            let header = load_trial_header(tx, trial_id)?;
            ensure_updatable(&header, trial_id)?;
            if state == TrialState::Running && header.state != TrialState::Waiting {
                debug!(trial_id = trial_id.get(), current = %header.state, "trial not claimable");
                return Ok(false);
            }
            let updated = if state == TrialState::Running {
                tx.execute(
                    "UPDATE trials SET state = ?1, datetime_start = ?2 WHERE trial_id = ?3",
                    params![state.as_str(), unix_millis(), trial_id.get()],
                )
            } else if state.is_finished() {
                tx.execute(
                    "UPDATE trials SET state = ?1, datetime_complete = ?2 WHERE trial_id = ?3",
                    params![state.as_str(), unix_millis(), trial_id.get()],
                )
            } else {
                tx.execute("UPDATE trials SET state = ?1 WHERE trial_id = ?2", params![
                    state.as_str(),
                    trial_id.get()
                ])
            };
            updated.map_err(|err| map_db_error(&err))?;
            Ok(true)
        })
    }

    fn set_trial_param(
        &self,
        trial_id: TrialId,
        param_name: &str,
        param_value_internal: f64,
        distribution: &Distribution,
    ) -> Result<(), StorageError> {
        self.write_ignoring_conflict("set_trial_param", |tx| {
            let header = load_trial_header(tx, trial_id)?;
            ensure_updatable(&header, trial_id)?;
            set_param_in_tx(
                tx,
                trial_id.get(),
                header.experiment_id,
                param_name,
                param_value_internal,
                distribution,
            )
        })
    }

    fn get_trial_param(&self, trial_id: TrialId, param_name: &str) -> Result<f64, StorageError> {
        self.read(|tx| {
            load_trial_header(tx, trial_id)?;
            tx.query_row(
                "SELECT param_value FROM trial_params WHERE trial_id = ?1 AND param_name = ?2",
                params![trial_id.get(), param_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| map_db_error(&err))?
            .ok_or_else(|| {
                StorageError::NotFound(format!(
                    "parameter '{param_name}' not found for trial {trial_id}"
                ))
            })
        })
    }

    fn set_trial_value(&self, trial_id: TrialId, value: f64) -> Result<(), StorageError> {
        self.write(|tx| {
            let header = load_trial_header(tx, trial_id)?;
            ensure_updatable(&header, trial_id)?;
            tx.execute("UPDATE trials SET value = ?1 WHERE trial_id = ?2", params![
                value,
                trial_id.get()
            ])
            .map_err(|err| map_db_error(&err))?;
            Ok(())
        })
    }

    fn set_trial_intermediate_value(
        &self,
        trial_id: TrialId,
        step: u64,
        value: f64,
    ) -> Result<(), StorageError> {
        let step = i64::try_from(step)
            .map_err(|_| StorageError::InvalidArgument(format!("step {step} is too large")))?;
        self.write_ignoring_conflict("set_trial_intermediate_value", |tx| {
            let header = load_trial_header(tx, trial_id)?;
            ensure_updatable(&header, trial_id)?;
            upsert_intermediate_values(tx, trial_id.get(), &[(step, value)])
        })
    }

    fn set_trial_user_attr(
        &self,
        trial_id: TrialId,
        key: &str,
        value: &Value,
    ) -> Result<(), StorageError> {
        let value_json = encode_json(value)?;
        self.write_ignoring_conflict("set_trial_user_attr", |tx| {
            let header = load_trial_header(tx, trial_id)?;
            ensure_updatable(&header, trial_id)?;
            upsert_attrs(tx, AttrTable::TrialUser, trial_id.get(), &[(key, value_json)])
        })
    }

    fn set_trial_system_attr(
        &self,
        trial_id: TrialId,
        key: &str,
        value: &Value,
    ) -> Result<(), StorageError> {
        let value_json = encode_json(value)?;
        self.write_ignoring_conflict("set_trial_system_attr", |tx| {
            let header = load_trial_header(tx, trial_id)?;
            ensure_updatable(&header, trial_id)?;
            upsert_attrs(tx, AttrTable::TrialSystem, trial_id.get(), &[(key, value_json)])
        })
    }

    fn get_trial(&self, trial_id: TrialId) -> Result<FrozenTrial, StorageError> {
        self.read(|tx| load_single_trial(tx, trial_id))
    }

    fn get_trial_number_from_id(&self, trial_id: TrialId) -> Result<u64, StorageError> {
        self.read(|tx| load_trial_header(tx, trial_id)).map(|header| header.number)
    }

    fn get_trial_id_from_experiment_id_trial_number(
        &self,
        experiment_id: ExperimentId,
        number: u64,
    ) -> Result<TrialId, StorageError> {
        let stored_number = i64::try_from(number)
            .map_err(|_| StorageError::InvalidArgument(format!("trial number {number} too large")))?;
        self.read(|tx| {
            tx.query_row(
                "SELECT trial_id FROM trials WHERE experiment_id = ?1 AND number = ?2",
                params![experiment_id.get(), stored_number],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| map_db_error(&err))
        })?
        .map(TrialId::new)
        .ok_or_else(|| {
            StorageError::NotFound(format!(
                "no trial with number {number} in experiment {experiment_id}"
            ))
        })
    }

    fn get_all_trials(
        &self,
        experiment_id: ExperimentId,
        states: Option<&[TrialState]>,
    ) -> Result<Vec<FrozenTrial>, StorageError> {
        self.read(|tx| {
            ensure_experiment_exists(tx, experiment_id)?;
            let ids = select_trial_ids(tx, experiment_id, states)?;
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let rows = match fetch_trial_rows(tx, &TrialScope::Ids(&ids)) {
                Ok(rows) => rows,
                Err(err) if classify_db_error(&err) == DbErrorKind::TooManyVariables => {
                    warn!(
                        experiment_id = experiment_id.get(),
                        trials = ids.len(),
                        "bound-parameter limit exceeded, falling back to an experiment scan"
                    );
                    fetch_trial_rows(tx, &TrialScope::Experiment(experiment_id.get()))
                        .map_err(|err| map_db_error(&err))?
                }
                Err(err) => return Err(map_db_error(&err)),
            };
            let keep: BTreeSet<i64> = ids.into_iter().collect();
            assemble_trials(rows, &keep)
        })
    }

    fn get_n_trials(
        &self,
        experiment_id: ExperimentId,
        state: Option<TrialState>,
    ) -> Result<u64, StorageError> {
        self.read(|tx| {
            ensure_experiment_exists(tx, experiment_id)?;
            let count: i64 = match state {
                Some(state) => tx.query_row(
                    "SELECT COUNT(*) FROM trials WHERE experiment_id = ?1 AND state = ?2",
                    params![experiment_id.get(), state.as_str()],
                    |row| row.get(0),
                ),
                None => tx.query_row(
                    "SELECT COUNT(*) FROM trials WHERE experiment_id = ?1",
                    params![experiment_id.get()],
                    |row| row.get(0),
                ),
            }
            .map_err(|err| map_db_error(&err))?;
            to_u64(count, "trial count")
        })
    }

    fn get_best_trial(&self, experiment_id: ExperimentId) -> Result<FrozenTrial, StorageError> {
        self.read(|tx| {
            let direction = read_direction(tx, experiment_id)?;
            best_trial_in_tx(tx, experiment_id, direction)
        })
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Trial identity and lifecycle columns.
struct TrialHeader {
    /// Owning experiment.
    experiment_id: ExperimentId,
    /// Per-experiment number.
    number: u64,
    /// Current state.
    state: TrialState,
}

/// Aggregate row of the experiment summary query.
struct SummaryRow {
    /// Experiment id.
    experiment_id: i64,
    /// Experiment name.
    name: String,
    /// Stored direction label.
    direction: String,
    /// Earliest trial start.
    datetime_start: Option<i64>,
    /// Trial count.
    n_trials: i64,
}

/// Row of the `trials` table.
struct TrialRow {
    /// Trial id.
    trial_id: i64,
    /// Per-experiment number; NULL only before the numbering migration.
    number: Option<i64>,
    /// Stored state label.
    state: String,
    /// Objective value.
    value: Option<f64>,
    /// Start time (unix ms).
    datetime_start: Option<i64>,
    /// Completion time (unix ms).
    datetime_complete: Option<i64>,
}

/// Row of the `trial_params` table.
struct ParamRow {
    /// Owning trial.
    trial_id: i64,
    /// Parameter name.
    name: String,
    /// Internal representation.
    value: f64,
    /// Distribution JSON.
    distribution_json: String,
}

/// Row of the `trial_values` table.
struct StepRow {
    /// Owning trial.
    trial_id: i64,
    /// Step index.
    step: i64,
    /// Intermediate value; NULL encodes NaN.
    value: Option<f64>,
}

/// Row of a trial attribute table.
struct AttrRow {
    /// Owning trial.
    trial_id: i64,
    /// Attribute key.
    key: String,
    /// JSON value.
    value_json: String,
}

/// Raw rows for a set of trials.
struct TrialRows {
    /// Trial rows ordered by id.
    trials: Vec<TrialRow>,
    /// Parameter rows.
    params: Vec<ParamRow>,
    /// Intermediate value rows.
    steps: Vec<StepRow>,
    /// User attribute rows.
    user_attrs: Vec<AttrRow>,
    /// System attribute rows.
    system_attrs: Vec<AttrRow>,
}

// ============================================================================
// SECTION: Attribute Tables
// ============================================================================

/// Key/value attribute tables sharing one layout.
#[derive(Debug, Clone, Copy)]
enum AttrTable {
    /// `experiment_user_attributes`.
    ExperimentUser,
    /// `experiment_system_attributes`.
    ExperimentSystem,
    /// `trial_user_attributes`.
    TrialUser,
    /// `trial_system_attributes`.
    TrialSystem,
}

impl AttrTable {
    /// Returns the table name.
    const fn table(self) -> &'static str {
        match self {
            Self::ExperimentUser => "experiment_user_attributes",
            Self::ExperimentSystem => "experiment_system_attributes",
            Self::TrialUser => "trial_user_attributes",
            Self::TrialSystem => "trial_system_attributes",
        }
    }

    /// Returns the owner foreign-key column.
    const fn owner_column(self) -> &'static str {
        match self {
            Self::ExperimentUser | Self::ExperimentSystem => "experiment_id",
            Self::TrialUser | Self::TrialSystem => "trial_id",
        }
    }
}

// ============================================================================
// SECTION: Trial Scopes
// ============================================================================

/// Row selection strategy for bulk trial loads.
enum TrialScope<'a> {
    /// Bind every trial id as an anonymous parameter; may exceed the limit.
    Ids(&'a [i64]),
    /// Scan every trial of an experiment and filter afterwards.
    Experiment(i64),
}

impl TrialScope<'_> {
    /// Returns the `WHERE` predicate over a `trial_id` column.
    fn predicate(&self) -> String {
        match self {
            Self::Ids(ids) => {
                let placeholders = vec!["?"; ids.len()];
                format!("trial_id IN ({})", placeholders.join(", "))
            }
            Self::Experiment(_) => {
                "trial_id IN (SELECT trial_id FROM trials WHERE experiment_id = ?1)".to_string()
            }
        }
    }

    /// Returns the values bound to the predicate.
    fn binds(&self) -> Vec<i64> {
        match self {
            Self::Ids(ids) => ids.to_vec(),
            Self::Experiment(experiment_id) => vec![*experiment_id],
        }
    }
}

// ============================================================================
// SECTION: Transaction Helpers
// ============================================================================

/// Builds the error for a missing experiment.
fn experiment_not_found(experiment_id: ExperimentId) -> StorageError {
    StorageError::NotFound(format!("experiment {experiment_id} not found"))
}

/// Fails with `NotFound` unless the experiment exists.
fn ensure_experiment_exists(
    tx: &Transaction<'_>,
    experiment_id: ExperimentId,
) -> Result<(), StorageError> {
    tx.query_row(
        "SELECT 1 FROM experiments WHERE experiment_id = ?1",
        params![experiment_id.get()],
        |_| Ok(()),
    )
    .optional()
    .map_err(|err| map_db_error(&err))?
    .ok_or_else(|| experiment_not_found(experiment_id))
}

/// Looks up an experiment id by name.
fn find_experiment_by_name(tx: &Transaction<'_>, name: &str) -> Result<Option<i64>, StorageError> {
    tx.query_row(
        "SELECT experiment_id FROM experiments WHERE experiment_name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()
    .map_err(|err| map_db_error(&err))
}

/// Reads an experiment's direction.
fn read_direction(
    tx: &Transaction<'_>,
    experiment_id: ExperimentId,
) -> Result<ExperimentDirection, StorageError> {
    let label: String = tx
        .query_row(
            "SELECT direction FROM experiments WHERE experiment_id = ?1",
            params![experiment_id.get()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| map_db_error(&err))?
        .ok_or_else(|| experiment_not_found(experiment_id))?;
    parse_direction(&label)
}

/// Parses a stored direction label.
fn parse_direction(label: &str) -> Result<ExperimentDirection, StorageError> {
    ExperimentDirection::from_str(label).map_err(StorageError::Invalid)
}

/// Parses a stored state label.
fn parse_state(label: &str) -> Result<TrialState, StorageError> {
    TrialState::from_str(label).map_err(StorageError::Invalid)
}

/// Loads a trial's identity and state.
fn load_trial_header(tx: &Transaction<'_>, trial_id: TrialId) -> Result<TrialHeader, StorageError> {
    let row: Option<(i64, Option<i64>, String)> = tx
        .query_row(
            "SELECT experiment_id, number, state FROM trials WHERE trial_id = ?1",
            params![trial_id.get()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(|err| map_db_error(&err))?;
    let (experiment_id, number, state) =
        row.ok_or_else(|| StorageError::NotFound(format!("trial {trial_id} not found")))?;
    Ok(TrialHeader {
        experiment_id: ExperimentId::new(experiment_id),
        number: stored_number(trial_id.get(), number)?,
        state: parse_state(&state)?,
    })
}

/// Fails with `InvalidStateTransition` when the trial is finished.
fn ensure_updatable(header: &TrialHeader, trial_id: TrialId) -> Result<(), StorageError> {
    if header.state.is_finished() {
        return Err(StorageError::InvalidStateTransition(format!(
            "trial #{} (id {trial_id}) has already finished with state {} and can not be updated",
            header.number, header.state
        )));
    }
    Ok(())
}

/// Inserts a trial and copies the template, if any.
fn create_trial_in_tx(
    tx: &Transaction<'_>,
    experiment_id: ExperimentId,
    template: Option<&FrozenTrial>,
) -> Result<TrialId, StorageError> {
    ensure_experiment_exists(tx, experiment_id)?;
    let number: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM trials WHERE experiment_id = ?1",
            params![experiment_id.get()],
            |row| row.get(0),
        )
        .map_err(|err| map_db_error(&err))?;
    let (value, datetime_start, datetime_complete) = match template {
        Some(template) => (
            template.value,
            template.datetime_start.map(Timestamp::as_unix_millis),
            template.datetime_complete.map(Timestamp::as_unix_millis),
        ),
        None => (None, Some(unix_millis()), None),
    };
    tx.execute(
        "INSERT INTO trials (experiment_id, number, state, value, datetime_start, \
         datetime_complete) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            experiment_id.get(),
            number,
            TrialState::Running.as_str(),
            value,
            datetime_start,
            datetime_complete
        ],
    )
    .map_err(|err| map_db_error(&err))?;
    let trial_id = tx.last_insert_rowid();
    if let Some(template) = template {
        copy_template(tx, trial_id, experiment_id, template)?;
    }
    Ok(TrialId::new(trial_id))
}

/// Copies template child rows, then moves the trial to the template state.
fn copy_template(
    tx: &Transaction<'_>,
    trial_id: i64,
    experiment_id: ExperimentId,
    template: &FrozenTrial,
) -> Result<(), StorageError> {
    for (name, value) in &template.params {
        let distribution = template.distributions.get(name).ok_or_else(|| {
            StorageError::InvalidArgument(format!("template parameter '{name}' has no distribution"))
        })?;
        let internal = distribution.to_internal_repr(value)?;
        set_param_in_tx(tx, trial_id, experiment_id, name, internal, distribution)?;
    }
    let user_attrs = encode_attrs(&template.user_attrs)?;
    upsert_attrs(tx, AttrTable::TrialUser, trial_id, &user_attrs)?;
    let system_attrs = encode_attrs(&template.system_attrs)?;
    upsert_attrs(tx, AttrTable::TrialSystem, trial_id, &system_attrs)?;
    let steps = template
        .intermediate_values
        .iter()
        .map(|(step, value)| {
            i64::try_from(*step)
                .map(|step| (step, *value))
                .map_err(|_| StorageError::InvalidArgument(format!("step {step} is too large")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    upsert_intermediate_values(tx, trial_id, &steps)?;
    tx.execute("UPDATE trials SET state = ?1 WHERE trial_id = ?2", params![
        template.state.as_str(),
        trial_id
    ])
    .map_err(|err| map_db_error(&err))?;
    Ok(())
}

/// Upserts one parameter after checking distribution compatibility.
///
/// The first write of a name on a trial is checked against any earlier use of
/// the name in the same experiment; later writes against the trial's own row.
fn set_param_in_tx(
    tx: &Transaction<'_>,
    trial_id: i64,
    experiment_id: ExperimentId,
    name: &str,
    internal: f64,
    distribution: &Distribution,
) -> Result<(), StorageError> {
    if !internal.is_finite() {
        return Err(StorageError::InvalidArgument(format!(
            "parameter '{name}' has non-finite internal value {internal}"
        )));
    }
    distribution.to_external_repr(internal)?;
    let distribution_json = distribution_to_json(distribution)?;
    let existing: Option<String> = tx
        .query_row(
            "SELECT distribution_json FROM trial_params WHERE trial_id = ?1 AND param_name = ?2",
            params![trial_id, name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| map_db_error(&err))?;
    if let Some(existing) = existing {
        check_distribution_compatibility(&json_to_distribution(&existing)?, distribution)?;
        tx.execute(
            "UPDATE trial_params SET param_value = ?1, distribution_json = ?2
             WHERE trial_id = ?3 AND param_name = ?4",
            params![internal, distribution_json, trial_id, name],
        )
        .map_err(|err| map_db_error(&err))?;
        return Ok(());
    }
    let previous: Option<String> = tx
        .query_row(
            "SELECT p.distribution_json FROM trial_params AS p
             JOIN trials AS t ON t.trial_id = p.trial_id
             WHERE t.experiment_id = ?1 AND p.param_name = ?2
             LIMIT 1",
            params![experiment_id.get(), name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| map_db_error(&err))?;
    if let Some(previous) = previous {
        check_distribution_compatibility(&json_to_distribution(&previous)?, distribution)?;
    }
    tx.execute(
        "INSERT INTO trial_params (trial_id, param_name, param_value, distribution_json)
         VALUES (?1, ?2, ?3, ?4)",
        params![trial_id, name, internal, distribution_json],
    )
    .map_err(|err| map_db_error(&err))?;
    Ok(())
}

/// Upserts attributes in two phases: fetch existing keys, then update or insert.
fn upsert_attrs(
    tx: &Transaction<'_>,
    table: AttrTable,
    owner_id: i64,
    entries: &[(&str, String)],
) -> Result<(), StorageError> {
    if entries.is_empty() {
        return Ok(());
    }
    let existing: BTreeSet<String> = {
        let mut statement = tx
            .prepare(&format!(
                "SELECT key FROM {} WHERE {} = ?1",
                table.table(),
                table.owner_column()
            ))
            .map_err(|err| map_db_error(&err))?;
        let keys = statement
            .query_map(params![owner_id], |row| row.get(0))
            .map_err(|err| map_db_error(&err))?;
        keys.collect::<rusqlite::Result<_>>().map_err(|err| map_db_error(&err))?
    };
    let (updates, inserts): (Vec<_>, Vec<_>) =
        entries.iter().partition(|(key, _)| existing.contains(*key));
    for (key, value_json) in updates {
        tx.execute(
            &format!(
                "UPDATE {} SET value_json = ?1 WHERE {} = ?2 AND key = ?3",
                table.table(),
                table.owner_column()
            ),
            params![value_json, owner_id, key],
        )
        .map_err(|err| map_db_error(&err))?;
    }
    for (key, value_json) in inserts {
        tx.execute(
            &format!(
                "INSERT INTO {} ({}, key, value_json) VALUES (?1, ?2, ?3)",
                table.table(),
                table.owner_column()
            ),
            params![owner_id, key, value_json],
        )
        .map_err(|err| map_db_error(&err))?;
    }
    Ok(())
}

/// Upserts intermediate values in two phases keyed by step.
fn upsert_intermediate_values(
    tx: &Transaction<'_>,
    trial_id: i64,
    entries: &[(i64, f64)],
) -> Result<(), StorageError> {
    if entries.is_empty() {
        return Ok(());
    }
    let existing: BTreeSet<i64> = {
        let mut statement = tx
            .prepare("SELECT step FROM trial_values WHERE trial_id = ?1")
            .map_err(|err| map_db_error(&err))?;
        let steps = statement
            .query_map(params![trial_id], |row| row.get(0))
            .map_err(|err| map_db_error(&err))?;
        steps.collect::<rusqlite::Result<_>>().map_err(|err| map_db_error(&err))?
    };
    let (updates, inserts): (Vec<_>, Vec<_>) =
        entries.iter().partition(|(step, _)| existing.contains(step));
    for (step, value) in updates {
        tx.execute(
            "UPDATE trial_values SET value = ?1 WHERE trial_id = ?2 AND step = ?3",
            params![value, trial_id, step],
        )
        .map_err(|err| map_db_error(&err))?;
    }
    for (step, value) in inserts {
        tx.execute(
            "INSERT INTO trial_values (trial_id, step, value) VALUES (?1, ?2, ?3)",
            params![trial_id, step, value],
        )
        .map_err(|err| map_db_error(&err))?;
    }
    Ok(())
}

/// Reads all attributes of one owner.
fn read_attrs(
    tx: &Transaction<'_>,
    table: AttrTable,
    owner_id: i64,
) -> Result<BTreeMap<String, Value>, StorageError> {
    let mut statement = tx
        .prepare(&format!(
            "SELECT key, value_json FROM {} WHERE {} = ?1",
            table.table(),
            table.owner_column()
        ))
        .map_err(|err| map_db_error(&err))?;
    let rows = statement
        .query_map(params![owner_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|err| map_db_error(&err))?;
    let mut attrs = BTreeMap::new();
    for row in rows {
        let (key, value_json) = row.map_err(|err| map_db_error(&err))?;
        let value = decode_json(&value_json, &key)?;
        attrs.insert(key, value);
    }
    Ok(attrs)
}

/// Selects trial ids of an experiment, optionally filtered by state.
fn select_trial_ids(
    tx: &Transaction<'_>,
    experiment_id: ExperimentId,
    states: Option<&[TrialState]>,
) -> Result<Vec<i64>, StorageError> {
    let mut sql = String::from("SELECT trial_id FROM trials WHERE experiment_id = ?1");
    let mut binds: Vec<String> = Vec::new();
    if let Some(states) = states {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let unique: BTreeSet<&'static str> = states.iter().map(|state| state.as_str()).collect();
        let placeholders: Vec<String> =
            (0 .. unique.len()).map(|offset| format!("?{}", offset + 2)).collect();
        sql.push_str(&format!(" AND state IN ({})", placeholders.join(", ")));
        binds.extend(unique.into_iter().map(str::to_string));
    }
    sql.push_str(" ORDER BY trial_id");
    let mut statement = tx.prepare(&sql).map_err(|err| map_db_error(&err))?;
    let mut values: Vec<rusqlite::types::Value> =
        vec![rusqlite::types::Value::Integer(experiment_id.get())];
    values.extend(binds.into_iter().map(rusqlite::types::Value::Text));
    let ids = statement
        .query_map(params_from_iter(values.iter()), |row| row.get(0))
        .map_err(|err| map_db_error(&err))?;
    ids.collect::<rusqlite::Result<Vec<i64>>>().map_err(|err| map_db_error(&err))
}

/// Fetches trial rows and all child rows for a scope.
///
/// Returns the raw driver error so callers can detect the bound-parameter
/// limit and switch scope.
fn fetch_trial_rows(tx: &Transaction<'_>, scope: &TrialScope<'_>) -> rusqlite::Result<TrialRows> {
    let predicate = scope.predicate();
    let binds = scope.binds();

    let mut statement = tx.prepare(&format!(
        "SELECT trial_id, number, state, value, datetime_start, datetime_complete
         FROM trials WHERE {predicate} ORDER BY trial_id"
    ))?;
    let trials = statement
        .query_map(params_from_iter(binds.iter()), |row| {
            Ok(TrialRow {
                trial_id: row.get(0)?,
                number: row.get(1)?,
                state: row.get(2)?,
                value: row.get(3)?,
                datetime_start: row.get(4)?,
                datetime_complete: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut statement = tx.prepare(&format!(
        "SELECT trial_id, param_name, param_value, distribution_json
         FROM trial_params WHERE {predicate} ORDER BY param_id"
    ))?;
    let params = statement
        .query_map(params_from_iter(binds.iter()), |row| {
            Ok(ParamRow {
                trial_id: row.get(0)?,
                name: row.get(1)?,
                value: row.get(2)?,
                distribution_json: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut statement = tx.prepare(&format!(
        "SELECT trial_id, step, value FROM trial_values WHERE {predicate} ORDER BY step"
    ))?;
    let steps = statement
        .query_map(params_from_iter(binds.iter()), |row| {
            Ok(StepRow {
                trial_id: row.get(0)?,
                step: row.get(1)?,
                value: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let user_attrs = fetch_trial_attr_rows(tx, AttrTable::TrialUser, &predicate, &binds)?;
    let system_attrs = fetch_trial_attr_rows(tx, AttrTable::TrialSystem, &predicate, &binds)?;
    Ok(TrialRows {
        trials,
        params,
        steps,
        user_attrs,
        system_attrs,
    })
}

/// Fetches trial attribute rows matching a scope predicate.
fn fetch_trial_attr_rows(
    tx: &Transaction<'_>,
    table: AttrTable,
    predicate: &str,
    binds: &[i64],
) -> rusqlite::Result<Vec<AttrRow>> {
    let mut statement =
        tx.prepare(&format!("SELECT trial_id, key, value_json FROM {} WHERE {predicate}", table.table()))?;
    statement
        .query_map(params_from_iter(binds.iter()), |row| {
            Ok(AttrRow {
                trial_id: row.get(0)?,
                key: row.get(1)?,
                value_json: row.get(2)?,
            })
        })?
        .collect()
}

/// Assembles frozen trials from raw rows, keeping only ids in `keep`.
fn assemble_trials(rows: TrialRows, keep: &BTreeSet<i64>) -> Result<Vec<FrozenTrial>, StorageError> {
    let mut trials: BTreeMap<i64, FrozenTrial> = BTreeMap::new();
    for row in rows.trials {
        if !keep.contains(&row.trial_id) {
            continue;
        }
        let trial_id = row.trial_id;
        let trial = FrozenTrial {
            trial_id: TrialId::new(trial_id),
            number: stored_number(trial_id, row.number)?,
            state: parse_state(&row.state)?,
            value: row.value,
            datetime_start: row.datetime_start.map(Timestamp::from_unix_millis),
            datetime_complete: row.datetime_complete.map(Timestamp::from_unix_millis),
            ..FrozenTrial::template(TrialState::Running)
        };
        trials.insert(trial_id, trial);
    }
    for param in rows.params {
        let Some(trial) = trials.get_mut(&param.trial_id) else {
            continue;
        };
        let invalid = |reason: String| {
            StorageError::Invalid(format!(
                "trial {} parameter '{}': {reason}",
                param.trial_id, param.name
            ))
        };
        let distribution = json_to_distribution(&param.distribution_json)
            .map_err(|err| invalid(err.to_string()))?;
        let external = distribution
            .to_external_repr(param.value)
            .map_err(|err| invalid(err.to_string()))?;
        trial.params.insert(param.name.clone(), external);
        trial.distributions.insert(param.name, distribution);
    }
    for step in rows.steps {
        if let Some(trial) = trials.get_mut(&step.trial_id) {
            let index = to_u64(step.step, "intermediate step")?;
            trial.intermediate_values.insert(index, step.value.unwrap_or(f64::NAN));
        }
    }
    for attr in rows.user_attrs {
        if let Some(trial) = trials.get_mut(&attr.trial_id) {
            let value = decode_json(&attr.value_json, &attr.key)?;
            trial.user_attrs.insert(attr.key, value);
        }
    }
    for attr in rows.system_attrs {
        if let Some(trial) = trials.get_mut(&attr.trial_id) {
            let value = decode_json(&attr.value_json, &attr.key)?;
            trial.system_attrs.insert(attr.key, value);
        }
    }
    Ok(trials.into_values().collect())
}

/// Loads one fully hydrated trial.
fn load_single_trial(tx: &Transaction<'_>, trial_id: TrialId) -> Result<FrozenTrial, StorageError> {
    let ids = [trial_id.get()];
    let rows = fetch_trial_rows(tx, &TrialScope::Ids(&ids)).map_err(|err| map_db_error(&err))?;
    let keep: BTreeSet<i64> = ids.into_iter().collect();
    assemble_trials(rows, &keep)?
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::NotFound(format!("trial {trial_id} not found")))
}

/// Returns the best completed trial for a direction.
///
/// `NotSet` experiments are ranked as minimizing.
fn best_trial_in_tx(
    tx: &Transaction<'_>,
    experiment_id: ExperimentId,
    direction: ExperimentDirection,
) -> Result<FrozenTrial, StorageError> {
    let order = match direction {
        ExperimentDirection::Maximize => "DESC",
        ExperimentDirection::Minimize | ExperimentDirection::NotSet => "ASC",
    };
    let best: Option<i64> = tx
        .query_row(
            &format!(
                "SELECT trial_id FROM trials
                 WHERE experiment_id = ?1 AND state = ?2 AND value IS NOT NULL
                 ORDER BY value {order}, trial_id ASC LIMIT 1"
            ),
            params![experiment_id.get(), TrialState::Complete.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| map_db_error(&err))?;
    let best = best.ok_or_else(|| {
        StorageError::NotFound(format!(
            "no trials are completed yet in experiment {experiment_id}"
        ))
    })?;
    load_single_trial(tx, TrialId::new(best))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the current unix epoch in milliseconds.
fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

/// Converts a stored trial number, rejecting pre-migration NULLs.
fn stored_number(trial_id: i64, number: Option<i64>) -> Result<u64, StorageError> {
    let number = number.ok_or_else(|| {
        StorageError::Invalid(format!(
            "trial {trial_id} has no number; run `trialstore storage upgrade`"
        ))
    })?;
    to_u64(number, "trial number")
}

/// Converts a stored non-negative integer.
fn to_u64(value: i64, what: &str) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::Invalid(format!("negative {what}: {value}")))
}

/// Encodes an attribute value as JSON text.
fn encode_json(value: &Value) -> Result<String, StorageError> {
    serde_json::to_string(value)
        .map_err(|err| StorageError::InvalidArgument(format!("attribute is not serializable: {err}")))
}

/// Encodes a map of attribute values.
fn encode_attrs(attrs: &BTreeMap<String, Value>) -> Result<Vec<(&str, String)>, StorageError> {
    attrs.iter().map(|(key, value)| Ok((key.as_str(), encode_json(value)?))).collect()
}

/// Decodes stored attribute JSON.
fn decode_json(value_json: &str, key: &str) -> Result<Value, StorageError> {
    serde_json::from_str(value_json)
        .map_err(|err| StorageError::Invalid(format!("attribute '{key}' holds invalid json: {err}")))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
