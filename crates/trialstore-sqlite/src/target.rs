// crates/trialstore-sqlite/src/target.rs
// ============================================================================
// Module: Connection Targets
// Description: Connection string parsing, dialect detection, engine defaults.
// Purpose: Turn a user-supplied database URL into something the pool opens.
// Dependencies: percent-encoding, trialstore-core, url
// ============================================================================

//! ## Overview
//! Connection targets use `dialect[+driver]://...` URLs. Only `sqlite` has a
//! driver in this crate; other dialects parse cleanly so construction can
//! report them as a missing driver.
//!
//! `sqlite:///relative.db` is relative to the working directory,
//! `sqlite:////abs/path.db` is absolute, and `sqlite://` or
//! `sqlite:///:memory:` selects a private in-memory database. Percent escapes
//! in the path are decoded, so `a%20b.db` opens `a b.db`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use percent_encoding::percent_decode_str;
use trialstore_core::StorageError;
use url::Url;

use crate::schema::SCHEMA_VERSION;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Placeholder substituted with the compiled-in schema version.
pub const SCHEMA_VERSION_PLACEHOLDER: &str = "{SCHEMA_VERSION}";
/// Dialects that drop idle connections and need a liveness check on checkout.
const PRE_PING_DIALECTS: &[&str] = &["mysql", "mariadb"];

// ============================================================================
// SECTION: Targets
// ============================================================================

/// Where an `SQLite` database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    /// Private in-memory database.
    Memory,
    /// Database file.
    File(PathBuf),
}

/// Parsed connection target.
///
/// # Invariants
/// - `url` has the schema-version placeholder already substituted.
/// - `dialect` is lowercase and never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Connection string after placeholder substitution.
    url: String,
    /// SQL dialect (the URL scheme without a driver suffix).
    dialect: String,
    /// Optional driver named after `+` in the scheme.
    driver: Option<String>,
}

impl ConnectionTarget {
    /// Parses a connection string, substituting `{SCHEMA_VERSION}` first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Invalid`] when the string is not a URL.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let url = substitute_schema_version(raw);
        let parsed = Url::parse(&url)
            .map_err(|err| StorageError::Invalid(format!("invalid storage url: {err}")))?;
        let scheme = parsed.scheme().to_ascii_lowercase();
        let (dialect, driver) = match scheme.split_once('+') {
            Some((dialect, driver)) => (dialect.to_string(), Some(driver.to_string())),
            None => (scheme, None),
        };
        if dialect.is_empty() {
            return Err(StorageError::Invalid("storage url is missing a dialect".to_string()));
        }
        Ok(Self {
            url,
            dialect,
            driver,
        })
    }

    /// Returns the connection string with placeholders substituted.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the SQL dialect.
    #[must_use]
    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    /// Returns the driver suffix, if any.
    #[must_use]
    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    /// Returns true when the dialect needs a connection check before use.
    #[must_use]
    pub fn requires_pre_ping(&self) -> bool {
        PRE_PING_DIALECTS.contains(&self.dialect.as_str())
    }

    /// Resolves the `SQLite` database location.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MissingDriver`] for any dialect other than
    /// `sqlite`, or for a driver suffix this crate does not provide.
    pub fn sqlite_location(&self) -> Result<SqliteLocation, StorageError> {
        if self.dialect != "sqlite" {
            return Err(StorageError::MissingDriver(format!(
                "no driver available for dialect '{}' (only sqlite is bundled)",
                self.dialect
            )));
        }
        if let Some(driver) = self.driver.as_deref()
            && driver != "rusqlite"
        {
            return Err(StorageError::MissingDriver(format!(
                "sqlite driver '{driver}' is not available"
            )));
        }
        let rest = self.url.split_once("://").map_or("", |(_, rest)| rest);
        let rest = rest.split_once('?').map_or(rest, |(path, _)| path);
        let encoded = rest.strip_prefix('/').unwrap_or(rest);
        let path = percent_decode_str(encoded).decode_utf8().map_err(|err| {
            StorageError::Invalid(format!("storage path is not valid UTF-8 once decoded: {err}"))
        })?;
        if path.is_empty() || path == ":memory:" {
            return Ok(SqliteLocation::Memory);
        }
        Ok(SqliteLocation::File(PathBuf::from(path.as_ref())))
    }
}

/// Replaces every `{SCHEMA_VERSION}` in a connection string.
#[must_use]
pub fn substitute_schema_version(raw: &str) -> String {
    raw.replace(SCHEMA_VERSION_PLACEHOLDER, &SCHEMA_VERSION.to_string())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::expect_used,
        clippy::unwrap_used,
        reason = "Test assertions use expect/unwrap for clarity."
    )]

    use std::path::PathBuf;

    use trialstore_core::StorageError;

    use super::ConnectionTarget;
    use super::SqliteLocation;
    use crate::schema::SCHEMA_VERSION;

    #[test]
    fn relative_and_absolute_sqlite_paths() {
        let relative = ConnectionTarget::parse("sqlite:///trials.db").unwrap();
        assert_eq!(
            relative.sqlite_location().unwrap(),
            SqliteLocation::File(PathBuf::from("trials.db"))
        );
        let absolute = ConnectionTarget::parse("sqlite:////var/lib/trials.db").unwrap();
        assert_eq!(
            absolute.sqlite_location().unwrap(),
            SqliteLocation::File(PathBuf::from("/var/lib/trials.db"))
        );
    }

    #[test]
    fn percent_escapes_in_paths_are_decoded() {
        let target = ConnectionTarget::parse("sqlite:////tmp/a%20b.db").unwrap();
        assert_eq!(
            target.sqlite_location().unwrap(),
            SqliteLocation::File(PathBuf::from("/tmp/a b.db"))
        );
        let target = ConnectionTarget::parse("sqlite:///data%2Fruns/%E2%9C%93.db").unwrap();
        assert_eq!(
            target.sqlite_location().unwrap(),
            SqliteLocation::File(PathBuf::from("data/runs/\u{2713}.db"))
        );
        let target = ConnectionTarget::parse("sqlite:///%FF.db").unwrap();
        assert!(matches!(target.sqlite_location(), Err(StorageError::Invalid(_))));
    }

    #[test]
    fn memory_targets() {
        for raw in ["sqlite://", "sqlite:///:memory:"] {
            let target = ConnectionTarget::parse(raw).unwrap();
            assert_eq!(target.sqlite_location().unwrap(), SqliteLocation::Memory);
        }
    }

    #[test]
    fn schema_version_placeholder_is_substituted() {
        let target = ConnectionTarget::parse("sqlite:///trials-{SCHEMA_VERSION}.db").unwrap();
        assert_eq!(target.url(), format!("sqlite:///trials-{SCHEMA_VERSION}.db"));
    }

    #[test]
    fn networked_dialects_report_missing_driver() {
        let target = ConnectionTarget::parse("mysql+pymysql://user:pw@db/trials").unwrap();
        assert_eq!(target.dialect(), "mysql");
        assert_eq!(target.driver(), Some("pymysql"));
        assert!(target.requires_pre_ping());
        assert!(matches!(target.sqlite_location(), Err(StorageError::MissingDriver(_))));
        let postgres = ConnectionTarget::parse("postgresql://db/trials").unwrap();
        assert!(!postgres.requires_pre_ping());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(ConnectionTarget::parse("not a url"), Err(StorageError::Invalid(_))));
    }
}
