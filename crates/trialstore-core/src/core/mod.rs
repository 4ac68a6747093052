// crates/trialstore-core/src/core/mod.rs
// ============================================================================
// Module: Trialstore Core Model
// Description: Domain types for experiments, trials, and distributions.
// Purpose: Group the storage-neutral data model.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Storage-neutral model types. Nothing here touches a database.

pub mod distributions;
pub mod experiment;
pub mod identifiers;
pub mod time;
pub mod trial;
