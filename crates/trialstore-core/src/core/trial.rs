// crates/trialstore-core/src/core/trial.rs
// ============================================================================
// Module: Trialstore Trials
// Description: Trial lifecycle states and the frozen trial read model.
// Purpose: Define the trial state machine vocabulary shared by all backends.
// Dependencies: crate::core::{distributions, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! A trial is one evaluation inside an experiment. It starts `RUNNING` (or
//! `WAITING` when queued for a worker) and ends in exactly one finished state.
//! Once finished, a trial is immutable. [`FrozenTrial`] is the snapshot
//! returned by every read operation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::distributions::Distribution;
use crate::core::distributions::ParamValue;
use crate::core::identifiers::TrialId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Trial State
// ============================================================================

/// Lifecycle state of a trial.
///
/// # Invariants
/// - `Complete`, `Pruned`, and `Fail` are terminal.
/// - Storage labels are stable (`RUNNING`, `WAITING`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialState {
    /// Trial is being evaluated.
    Running,
    /// Trial is queued and may be claimed by a worker.
    Waiting,
    /// Trial finished with an objective value.
    Complete,
    /// Trial was stopped early by a pruner.
    Pruned,
    /// Trial failed.
    Fail,
}

impl TrialState {
    /// All states in declaration order.
    pub const ALL: [Self; 5] = [Self::Running, Self::Waiting, Self::Complete, Self::Pruned, Self::Fail];

    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Pruned | Self::Fail)
    }

    /// Returns the storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Waiting => "WAITING",
            Self::Complete => "COMPLETE",
            Self::Pruned => "PRUNED",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for TrialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrialState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == value)
            .ok_or_else(|| format!("unknown trial state: {value}"))
    }
}

// ============================================================================
// SECTION: Frozen Trial
// ============================================================================

/// Immutable snapshot of a trial and all of its child records.
///
/// # Invariants
/// - `params` and `distributions` have identical key sets.
/// - `datetime_complete` is set iff the trial reached a finished state
///   through the storage engine (clones copy the template's value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenTrial {
    /// Storage-wide trial identifier.
    pub trial_id: TrialId,
    /// Zero-based sequence number within the owning experiment.
    pub number: u64,
    /// Lifecycle state.
    pub state: TrialState,
    /// Final objective value.
    pub value: Option<f64>,
    /// Time the trial started running.
    pub datetime_start: Option<Timestamp>,
    /// Time the trial reached a finished state.
    pub datetime_complete: Option<Timestamp>,
    /// Parameters in their typed (external) form.
    pub params: BTreeMap<String, ParamValue>,
    /// Distribution each parameter was sampled from.
    pub distributions: BTreeMap<String, Distribution>,
    /// User attributes.
    pub user_attrs: BTreeMap<String, Value>,
    /// System attributes.
    pub system_attrs: BTreeMap<String, Value>,
    /// Intermediate (learning-curve) values keyed by step.
    pub intermediate_values: BTreeMap<u64, f64>,
}

impl FrozenTrial {
    /// Builds an unsaved template in the given state with no child records.
    ///
    /// Storage assigns the real identifier and number when the template is
    /// used with `create_new_trial`.
    #[must_use]
    pub const fn template(state: TrialState) -> Self {
        Self {
            trial_id: TrialId::new(0),
            number: 0,
            state,
            value: None,
            datetime_start: None,
            datetime_complete: None,
            params: BTreeMap::new(),
            distributions: BTreeMap::new(),
            user_attrs: BTreeMap::new(),
            system_attrs: BTreeMap::new(),
            intermediate_values: BTreeMap::new(),
        }
    }

    /// Returns the internal (numeric) form of a parameter.
    ///
    /// Returns `None` when the parameter is absent or its value no longer
    /// fits the recorded distribution.
    #[must_use]
    pub fn internal_param(&self, name: &str) -> Option<f64> {
        let value = self.params.get(name)?;
        let distribution = self.distributions.get(name)?;
        distribution.to_internal_repr(value).ok()
    }
}
