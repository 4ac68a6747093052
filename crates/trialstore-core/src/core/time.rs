// crates/trialstore-core/src/core/time.rs
// ============================================================================
// Module: Trialstore Time Model
// Description: Timestamp representation for trial start/completion times.
// Purpose: Provide a storage-neutral time value for trial records.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Trial timestamps are unix epoch milliseconds. The core model never reads
//! wall-clock time directly; storage backends stamp values when a trial is
//! created or changes state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Unix epoch milliseconds attached to trial lifecycle events.
///
/// # Invariants
/// - No validation is performed; monotonicity is a caller responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }
}
