// crates/trialstore-core/src/core/identifiers.rs
// ============================================================================
// Module: Trialstore Identifiers
// Description: Opaque integer identifiers for experiments and trials.
// Purpose: Keep experiment and trial keys from being mixed up at call sites.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Experiments and trials are keyed by the integer primary keys assigned by
//! the backing relational store. The identifiers are transparent on the wire
//! and carry no ordering meaning beyond the store's own assignment order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Experiment identifier assigned by the storage backend.
///
/// # Invariants
/// - Unique across all experiments of one storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(i64);

impl ExperimentId {
    /// Creates an experiment identifier from a raw storage key.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw storage key.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Trial identifier assigned by the storage backend.
///
/// # Invariants
/// - Unique across all trials of one storage (unlike the per-experiment
///   trial number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialId(i64);

impl TrialId {
    /// Creates a trial identifier from a raw storage key.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw storage key.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TrialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
