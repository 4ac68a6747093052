// crates/trialstore-core/src/core/experiment.rs
// ============================================================================
// Module: Trialstore Experiments
// Description: Optimization direction and experiment summary read model.
// Purpose: Describe experiment-level metadata returned by storage queries.
// Dependencies: crate::core::{identifiers, time, trial}, serde
// ============================================================================

//! ## Overview
//! An experiment is a named container of trials with an optimization
//! direction. The direction starts as [`ExperimentDirection::NotSet`] and may
//! be set once; storage rejects any later change to a different direction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ExperimentId;
use crate::core::time::Timestamp;
use crate::core::trial::FrozenTrial;

// ============================================================================
// SECTION: Direction
// ============================================================================

/// Optimization direction of an experiment.
///
/// # Invariants
/// - Once set to a value other than `NotSet`, the direction never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentDirection {
    /// Direction not chosen yet.
    #[default]
    NotSet,
    /// Lower objective values are better.
    Minimize,
    /// Higher objective values are better.
    Maximize,
}

impl ExperimentDirection {
    /// Returns the storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotSet => "NOT_SET",
            Self::Minimize => "MINIMIZE",
            Self::Maximize => "MAXIMIZE",
        }
    }
}

impl fmt::Display for ExperimentDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentDirection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "NOT_SET" => Ok(Self::NotSet),
            "MINIMIZE" => Ok(Self::Minimize),
            "MAXIMIZE" => Ok(Self::Maximize),
            other => Err(format!("unknown experiment direction: {other}")),
        }
    }
}

// ============================================================================
// SECTION: Summary
// ============================================================================

/// Aggregate view of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    /// Experiment identifier.
    pub experiment_id: ExperimentId,
    /// Unique experiment name.
    pub name: String,
    /// Optimization direction.
    pub direction: ExperimentDirection,
    /// Best completed trial, if any trial has completed.
    pub best_trial: Option<FrozenTrial>,
    /// Experiment user attributes.
    pub user_attrs: BTreeMap<String, Value>,
    /// Experiment system attributes.
    pub system_attrs: BTreeMap<String, Value>,
    /// Number of trials in the experiment.
    pub n_trials: u64,
    /// Earliest trial start time.
    pub datetime_start: Option<Timestamp>,
}
