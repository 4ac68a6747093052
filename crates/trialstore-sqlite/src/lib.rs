// crates/trialstore-sqlite/src/lib.rs
// ============================================================================
// Module: Trialstore SQLite
// Description: SQLite-backed experiment and trial storage.
// Purpose: Provide a durable TrialStorage with schema versioning.
// Dependencies: rusqlite, serde, serde_json, tracing, trialstore-core, url, uuid
// ============================================================================

//! ## Overview
//! This crate implements [`trialstore_core::TrialStorage`] on `SQLite`.
//! [`SqliteTrialStorage`] owns a connection-per-thread pool and a
//! [`VersionManager`] that stamps and migrates the schema.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod pool;
pub mod schema;
pub mod store;
pub mod target;
pub mod version;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use schema::SCHEMA_VERSION;
pub use store::SqliteJournalMode;
pub use store::SqliteStorageConfig;
pub use store::SqliteSyncMode;
pub use store::SqliteTrialStorage;
pub use target::ConnectionTarget;
pub use target::SqliteLocation;
pub use version::MigrationConfig;
pub use version::VersionInfo;
pub use version::VersionManager;
