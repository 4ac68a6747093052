// crates/trialstore-core/src/lib.rs
// ============================================================================
// Module: Trialstore Core
// Description: Domain model and storage contract for experiment/trial storage.
// Purpose: Share one vocabulary between storage backends and their callers.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Trialstore core defines experiments, trials, sampling distributions, and
//! the [`TrialStorage`] facade implemented by relational backends. The crate
//! performs no I/O and never reads the wall clock.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::distributions;
pub use crate::core::distributions::Distribution;
pub use crate::core::distributions::DistributionError;
pub use crate::core::distributions::ParamValue;
pub use crate::core::experiment::ExperimentDirection;
pub use crate::core::experiment::ExperimentSummary;
pub use crate::core::identifiers::ExperimentId;
pub use crate::core::identifiers::TrialId;
pub use crate::core::time::Timestamp;
pub use crate::core::trial::FrozenTrial;
pub use crate::core::trial::TrialState;
pub use crate::interfaces::StorageError;
pub use crate::interfaces::TrialStorage;
