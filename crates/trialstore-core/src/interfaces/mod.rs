// crates/trialstore-core/src/interfaces/mod.rs
// ============================================================================
// Module: Trialstore Interfaces
// Description: Storage backend contract and its failure taxonomy.
// Purpose: Let optimization drivers run against any trial storage backend.
// Dependencies: crate::core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`TrialStorage`] is the facade an optimization driver talks to: experiment
//! and trial CRUD, the trial state machine, and best-trial/summary queries.
//! Every method is a single, blocking unit of work.
//!
//! Failures are reported through [`StorageError`]. One expected outcome is not
//! an error: [`TrialStorage::set_trial_state`] returns `Ok(false)` when a
//! worker tries to claim a trial that is not `WAITING`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::core::distributions::Distribution;
use crate::core::distributions::DistributionError;
use crate::core::experiment::ExperimentDirection;
use crate::core::experiment::ExperimentSummary;
use crate::core::identifiers::ExperimentId;
use crate::core::identifiers::TrialId;
use crate::core::trial::FrozenTrial;
use crate::core::trial::TrialState;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Trial storage errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Messages carry entity ids and conflicting values, never payload blobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Experiment, trial, or parameter lookup missed.
    #[error("not found: {0}")]
    NotFound(String),
    /// Another experiment already uses the requested name.
    #[error("duplicate experiment name: {0}")]
    DuplicateExperimentName(String),
    /// A unique-constraint violation that is not a known benign race.
    #[error("duplicate key: {0}")]
    Conflict(String),
    /// Direction overwrite or mutation of a finished trial.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),
    /// Caller passed a value the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Parameter distribution conflicts with an earlier use of the name.
    #[error("incompatible distribution: {0}")]
    IncompatibleDistribution(String),
    /// Retryable operational failure (lock contention, deadlock).
    #[error("transient storage failure: {0}")]
    Transient(String),
    /// Any other database failure during a unit of work.
    #[error("storage internal error: {0}")]
    Internal(String),
    /// Persisted schema does not match the running library.
    #[error("schema incompatible: {0}")]
    SchemaIncompatible(String),
    /// No driver is available for the connection target.
    #[error("missing driver: {0}")]
    MissingDriver(String),
    /// Invalid configuration or stored data.
    #[error("invalid storage data: {0}")]
    Invalid(String),
}

impl StorageError {
    /// Returns true for failures that a bounded retry may resolve.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<DistributionError> for StorageError {
    fn from(error: DistributionError) -> Self {
        match error {
            DistributionError::Incompatible(message) => Self::IncompatibleDistribution(message),
            DistributionError::OutOfDomain(message) | DistributionError::Invalid(message) => {
                Self::InvalidArgument(message)
            }
            DistributionError::Json(message) => Self::Invalid(message),
        }
    }
}

// ============================================================================
// SECTION: Trial Storage
// ============================================================================

/// Experiment and trial persistence for optimization drivers.
///
/// Implementations must be shareable across threads; each call runs in its
/// own transaction and nothing is cached between calls.
pub trait TrialStorage: Send + Sync {
    /// Creates an experiment, generating a unique name when none is given.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DuplicateExperimentName`] when the name is taken.
    fn create_new_experiment(&self, name: Option<&str>) -> Result<ExperimentId, StorageError>;

    /// Deletes an experiment and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the experiment does not exist.
    fn delete_experiment(&self, experiment_id: ExperimentId) -> Result<(), StorageError>;

    /// Sets the optimization direction once.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidStateTransition`] when a different
    /// direction is already set.
    fn set_experiment_direction(
        &self,
        experiment_id: ExperimentId,
        direction: ExperimentDirection,
    ) -> Result<(), StorageError>;

    /// Upserts an experiment user attribute.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the experiment is missing or the write fails.
    fn set_experiment_user_attr(
        &self,
        experiment_id: ExperimentId,
        key: &str,
        value: &Value,
    ) -> Result<(), StorageError>;

    /// Upserts an experiment system attribute.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the experiment is missing or the write fails.
    fn set_experiment_system_attr(
        &self,
        experiment_id: ExperimentId,
        key: &str,
        value: &Value,
    ) -> Result<(), StorageError>;

    /// Resolves an experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when no experiment has the name.
    fn get_experiment_id_from_name(&self, name: &str) -> Result<ExperimentId, StorageError>;

    /// Resolves the experiment owning a trial.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the trial does not exist.
    fn get_experiment_id_from_trial_id(
        &self,
        trial_id: TrialId,
    ) -> Result<ExperimentId, StorageError>;

    /// Returns the experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the experiment does not exist.
    fn get_experiment_name(&self, experiment_id: ExperimentId) -> Result<String, StorageError>;

    /// Returns the experiment direction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the experiment does not exist.
    fn get_experiment_direction(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<ExperimentDirection, StorageError>;

    /// Returns all experiment user attributes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the experiment does not exist.
    fn get_experiment_user_attrs(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<BTreeMap<String, Value>, StorageError>;

    /// Returns all experiment system attributes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the experiment does not exist.
    fn get_experiment_system_attrs(
        &self,
        experiment_id: ExperimentId,
    ) -> Result<BTreeMap<String, Value>, StorageError>;

    /// Summarizes every experiment, including its best trial when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the query fails.
    fn get_all_experiment_summaries(&self) -> Result<Vec<ExperimentSummary>, StorageError>;

    /// Creates a trial, optionally cloned from a template.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the experiment does not exist,
    /// or the last [`StorageError::Transient`] once retries are exhausted.
    fn create_new_trial(
        &self,
        experiment_id: ExperimentId,
        template: Option<&FrozenTrial>,
    ) -> Result<TrialId, StorageError>;

    /// Moves a trial to a new state.
    ///
    /// Returns `Ok(false)` without changing anything when `state` is
    /// `RUNNING` and the trial is not currently `WAITING`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for an unknown trial and
    /// [`StorageError::InvalidStateTransition`] for a finished trial.
    fn set_trial_state(&self, trial_id: TrialId, state: TrialState) -> Result<bool, StorageError>;

    /// Upserts a parameter in its internal form.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::IncompatibleDistribution`] when the
    /// distribution conflicts with an earlier use of the name.
    fn set_trial_param(
        &self,
        trial_id: TrialId,
        param_name: &str,
        param_value_internal: f64,
        distribution: &Distribution,
    ) -> Result<(), StorageError>;

    /// Returns a parameter in its internal form.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the trial or parameter is missing.
    fn get_trial_param(&self, trial_id: TrialId, param_name: &str) -> Result<f64, StorageError>;

    /// Sets the final objective value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidStateTransition`] for a finished trial.
    fn set_trial_value(&self, trial_id: TrialId, value: f64) -> Result<(), StorageError>;

    /// Upserts an intermediate value at `step`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidStateTransition`] for a finished trial.
    fn set_trial_intermediate_value(
        &self,
        trial_id: TrialId,
        step: u64,
        value: f64,
    ) -> Result<(), StorageError>;

    /// Upserts a trial user attribute.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidStateTransition`] for a finished trial.
    fn set_trial_user_attr(
        &self,
        trial_id: TrialId,
        key: &str,
        value: &Value,
    ) -> Result<(), StorageError>;

    /// Upserts a trial system attribute.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidStateTransition`] for a finished trial.
    fn set_trial_system_attr(
        &self,
        trial_id: TrialId,
        key: &str,
        value: &Value,
    ) -> Result<(), StorageError>;

    /// Returns a fully hydrated trial snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the trial does not exist.
    fn get_trial(&self, trial_id: TrialId) -> Result<FrozenTrial, StorageError>;

    /// Returns the per-experiment number of a trial.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the trial does not exist.
    fn get_trial_number_from_id(&self, trial_id: TrialId) -> Result<u64, StorageError>;

    /// Resolves a trial by experiment and number.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when no such trial exists.
    fn get_trial_id_from_experiment_id_trial_number(
        &self,
        experiment_id: ExperimentId,
        number: u64,
    ) -> Result<TrialId, StorageError>;

    /// Returns every trial of an experiment, optionally filtered by state.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the experiment does not exist.
    fn get_all_trials(
        &self,
        experiment_id: ExperimentId,
        states: Option<&[TrialState]>,
    ) -> Result<Vec<FrozenTrial>, StorageError>;

    /// Counts trials of an experiment, optionally in one state.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the experiment does not exist.
    fn get_n_trials(
        &self,
        experiment_id: ExperimentId,
        state: Option<TrialState>,
    ) -> Result<u64, StorageError>;

    /// Returns the best completed trial according to the experiment direction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when no trial has completed.
    fn get_best_trial(&self, experiment_id: ExperimentId) -> Result<FrozenTrial, StorageError>;
}
