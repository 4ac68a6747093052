//! Config load validation tests for trialstore-config.
// crates/trialstore-config/tests/load_validation.rs
// =============================================================================
// Module: Config Load Validation Tests
// Description: Validate config loading guards and section validation.
// Purpose: Ensure config input handling is strict and fail-closed.
// =============================================================================

#![allow(
    clippy::use_debug,
    clippy::panic_in_result_fn,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tempfile::TempDir;
use trialstore_config::ConfigError;
use trialstore_config::LogFormat;
use trialstore_config::TrialstoreConfig;
use trialstore_sqlite::SqliteJournalMode;
use trialstore_sqlite::SqliteSyncMode;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<TrialstoreConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config load".to_string()),
    }
}

fn write_config(content: &str) -> Result<NamedTempFile, String> {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(content.as_bytes()).map_err(|err| err.to_string())?;
    Ok(file)
}

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a".repeat(5_000);
    assert_invalid(TrialstoreConfig::load(Some(Path::new(&long_path))), "config path exceeds max length")
}

#[test]
fn load_rejects_path_component_too_long() -> TestResult {
    let long_component = "a".repeat(300);
    assert_invalid(
        TrialstoreConfig::load(Some(Path::new(&long_component))),
        "config path component too long",
    )
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&vec![b'#'; 1_048_577]).map_err(|err| err.to_string())?;
    assert_invalid(TrialstoreConfig::load(Some(file.path())), "config file exceeds size limit")
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(TrialstoreConfig::load(Some(file.path())), "config file must be utf-8")
}

#[test]
fn load_reports_missing_explicit_file() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let missing = dir.path().join("absent.toml");
    match TrialstoreConfig::load_or_default(Some(&missing)) {
        Err(ConfigError::Io(_)) => Ok(()),
        other => Err(format!("expected io error, got {other:?}")),
    }
}

#[test]
fn load_rejects_unknown_fields() -> TestResult {
    let file = write_config("[storage]\nurl = \"sqlite://\"\nmystery = 1\n")?;
    assert_invalid(TrialstoreConfig::load(Some(file.path())), "config parse error")
}

#[test]
fn empty_file_yields_defaults() -> TestResult {
    let file = write_config("")?;
    let config = TrialstoreConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    if config != TrialstoreConfig::default() {
        return Err(format!("unexpected config {config:?}"));
    }
    if config.storage.busy_timeout_ms != 5_000 || config.logging.level != "info" {
        return Err("defaults drifted".to_string());
    }
    Ok(())
}

#[test]
fn full_file_parses_every_field() -> TestResult {
    let file = write_config(
        r#"
[storage]
url = "sqlite:///trials-{SCHEMA_VERSION}.db"
busy_timeout_ms = 250
journal_mode = "delete"
sync_mode = "normal"
pre_ping = true
max_bound_parameters = 64
skip_compatibility_check = true

[logging]
level = "debug"
format = "json"
"#,
    )?;
    let config = TrialstoreConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    let storage = config.storage.to_storage_config(None).map_err(|err| err.to_string())?;
    if storage.url != "sqlite:///trials-{SCHEMA_VERSION}.db"
        || storage.busy_timeout_ms != 250
        || storage.journal_mode != SqliteJournalMode::Delete
        || storage.sync_mode != SqliteSyncMode::Normal
        || storage.pre_ping != Some(true)
        || storage.max_bound_parameters != Some(64)
        || !storage.skip_compatibility_check
    {
        return Err(format!("unexpected storage config {storage:?}"));
    }
    if config.logging.format != LogFormat::Json {
        return Err("expected json log format".to_string());
    }
    Ok(())
}

#[test]
fn storage_values_are_range_checked() -> TestResult {
    assert_invalid(
        TrialstoreConfig::from_toml_str("[storage]\nbusy_timeout_ms = 0\n"),
        "busy_timeout_ms",
    )?;
    assert_invalid(
        TrialstoreConfig::from_toml_str("[storage]\nmax_bound_parameters = 3\n"),
        "max_bound_parameters must be at least 8",
    )?;
    assert_invalid(TrialstoreConfig::from_toml_str("[storage]\nurl = \"  \"\n"), "non-empty")?;
    assert_invalid(
        TrialstoreConfig::from_toml_str("[storage]\nurl = \"trials.db\"\n"),
        "dialect[+driver]",
    )
}

#[test]
fn logging_level_is_checked() -> TestResult {
    assert_invalid(TrialstoreConfig::from_toml_str("[logging]\nlevel = \"loud\"\n"), "logging.level")?;
    TrialstoreConfig::from_toml_str("[logging]\nlevel = \"WARN\"\n").map_err(|err| err.to_string())?;
    Ok(())
}

#[test]
fn cli_url_overrides_file_url() -> TestResult {
    let config = TrialstoreConfig::from_toml_str("[storage]\nurl = \"sqlite:///a.db\"\n")
        .map_err(|err| err.to_string())?;
    let storage =
        config.storage.to_storage_config(Some("sqlite:///b.db")).map_err(|err| err.to_string())?;
    if storage.url != "sqlite:///b.db" {
        return Err(format!("override ignored: {}", storage.url));
    }
    match TrialstoreConfig::default().storage.to_storage_config(None) {
        Err(ConfigError::Invalid(message)) if message.contains("--storage") => Ok(()),
        other => Err(format!("expected missing url error, got {other:?}")),
    }
}
