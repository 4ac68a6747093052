// crates/trialstore-config/src/lib.rs
// ============================================================================
// Module: Trialstore Config Library
// Description: Configuration model and validation for trialstore.
// Purpose: Single source of truth for trialstore.toml semantics.
// Dependencies: serde, thiserror, toml, trialstore-sqlite
// ============================================================================

//! ## Overview
//! `trialstore-config` defines the `trialstore.toml` model: a `[storage]`
//! section that maps onto [`trialstore_sqlite::SqliteStorageConfig`] and a
//! `[logging]` section consumed by the CLI.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
