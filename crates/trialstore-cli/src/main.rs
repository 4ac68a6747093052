// crates/trialstore-cli/src/main.rs
// ============================================================================
// Module: Trialstore CLI Entry Point
// Description: Command dispatcher for storage and experiment administration.
// Purpose: Upgrade and inspect storage schemas and manage experiments.
// Dependencies: clap, thiserror, tracing-subscriber, trialstore-config,
//               trialstore-core, trialstore-sqlite
// ============================================================================

//! ## Overview
//! `trialstore` opens the storage named by `--storage` or the `[storage]`
//! section of the config file and runs one command against it. Command
//! results go to stdout; logs and errors go to stderr.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trialstore_config::LogFormat;
use trialstore_config::LoggingConfig;
use trialstore_config::TrialstoreConfig;
use trialstore_core::ExperimentDirection;
use trialstore_core::TrialStorage;
use trialstore_sqlite::SqliteTrialStorage;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "trialstore", version, disable_help_subcommand = true)]
struct Cli {
    /// Path to `trialstore.toml`.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Storage URL, overriding `storage.url`.
    #[arg(long, value_name = "URL", global = true)]
    storage: Option<String>,
    /// Command to run.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Storage schema commands.
    Storage {
        /// Selected storage subcommand.
        #[command(subcommand)]
        command: StorageCommand,
    },
    /// Experiment administration commands.
    Experiment {
        /// Selected experiment subcommand.
        #[command(subcommand)]
        command: ExperimentCommand,
    },
}

/// Storage schema subcommands.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum StorageCommand {
    /// Upgrade the schema to the head revision.
    Upgrade,
    /// Print the applied schema revision.
    Current,
    /// Print the newest known schema revision.
    Head,
    /// Print every known revision, newest first.
    History,
}

/// Experiment subcommands.
#[derive(Subcommand, Debug)]
enum ExperimentCommand {
    /// Create an experiment and print its name.
    Create {
        /// Experiment name; generated when omitted.
        #[arg(long)]
        name: Option<String>,
        /// Optimization direction.
        #[arg(long, value_enum)]
        direction: Option<DirectionArg>,
    },
    /// Delete an experiment and all of its trials.
    Delete {
        /// Experiment name.
        #[arg(long)]
        name: String,
    },
    /// Print JSON summaries of every experiment.
    List,
}

/// Direction values accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionArg {
    /// Lower is better.
    Minimize,
    /// Higher is better.
    Maximize,
}

impl From<DirectionArg> for ExperimentDirection {
    fn from(direction: DirectionArg) -> Self {
        match direction {
            DirectionArg::Minimize => Self::Minimize,
            DirectionArg::Maximize => Self::Maximize,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a user-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Parses arguments, initializes logging, and dispatches the command.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let config = TrialstoreConfig::load_or_default(cli.config.as_deref())
        .map_err(|err| CliError::new(err.to_string()))?;
    init_logging(&config.logging)?;
    match cli.command {
        Commands::Storage {
            command,
        } => command_storage(&config, cli.storage.as_deref(), command),
        Commands::Experiment {
            command,
        } => command_experiment(&config, cli.storage.as_deref(), command),
    }
}

/// Installs the global tracing subscriber on stderr.
fn init_logging(logging: &LoggingConfig) -> CliResult<()> {
    let filter = log_filter(logging)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let installed = match logging.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| CliError::new(format!("failed to initialize logging: {err}")))
}

/// Builds the log filter from `RUST_LOG`, falling back to the configured level.
fn log_filter(logging: &LoggingConfig) -> CliResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(logging.level.trim().to_ascii_lowercase())
        .map_err(|err| CliError::new(format!("invalid log level: {err}")))
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Opens storage from config and an optional URL override.
fn open_storage(
    config: &TrialstoreConfig,
    storage_url: Option<&str>,
    skip_compatibility_check: bool,
) -> CliResult<SqliteTrialStorage> {
    let mut storage_config = config
        .storage
        .to_storage_config(storage_url)
        .map_err(|err| CliError::new(err.to_string()))?;
    storage_config.skip_compatibility_check |= skip_compatibility_check;
    SqliteTrialStorage::new(storage_config).map_err(|err| CliError::new(err.to_string()))
}

/// Runs a storage schema command.
fn command_storage(
    config: &TrialstoreConfig,
    storage_url: Option<&str>,
    command: StorageCommand,
) -> CliResult<ExitCode> {
    let storage = open_storage(config, storage_url, true)?;
    let output = match command {
        StorageCommand::Upgrade => {
            storage.upgrade().map_err(|err| CliError::new(err.to_string()))?;
            let head = storage.get_head_version();
            info!(revision = %head, "storage upgraded");
            format!("storage is at revision {head}")
        }
        StorageCommand::Current => {
            storage.get_current_version().map_err(|err| CliError::new(err.to_string()))?
        }
        StorageCommand::Head => storage.get_head_version(),
        StorageCommand::History => {
            let current =
                storage.get_current_version().map_err(|err| CliError::new(err.to_string()))?;
            render_history(&storage.get_all_versions(), &current)
        }
    };
    write_stdout_line(&output).map_err(|err| CliError::new(output_error(&err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Runs an experiment administration command.
fn command_experiment(
    config: &TrialstoreConfig,
    storage_url: Option<&str>,
    command: ExperimentCommand,
) -> CliResult<ExitCode> {
    let storage = open_storage(config, storage_url, false)?;
    let output = match command {
        ExperimentCommand::Create {
            name,
            direction,
        } => {
            let experiment_id = storage
                .create_new_experiment(name.as_deref())
                .map_err(|err| CliError::new(err.to_string()))?;
            if let Some(direction) = direction {
                storage
                    .set_experiment_direction(experiment_id, direction.into())
                    .map_err(|err| CliError::new(err.to_string()))?;
            }
            storage.get_experiment_name(experiment_id).map_err(|err| CliError::new(err.to_string()))?
        }
        ExperimentCommand::Delete {
            name,
        } => {
            let experiment_id = storage
                .get_experiment_id_from_name(&name)
                .map_err(|err| CliError::new(err.to_string()))?;
            storage.delete_experiment(experiment_id).map_err(|err| CliError::new(err.to_string()))?;
            format!("deleted experiment {name}")
        }
        ExperimentCommand::List => {
            let summaries = storage
                .get_all_experiment_summaries()
                .map_err(|err| CliError::new(err.to_string()))?;
            serde_json::to_string_pretty(&summaries)
                .map_err(|err| CliError::new(format!("failed to render summaries: {err}")))?
        }
    };
    write_stdout_line(&output).map_err(|err| CliError::new(output_error(&err)))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Renders revision history, newest first, marking the applied revision.
fn render_history(revisions: &[String], current: &str) -> String {
    revisions
        .iter()
        .map(|revision| {
            if revision == current {
                format!("{revision} (current)")
            } else {
                revision.clone()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(error: &std::io::Error) -> String {
    format!("failed to write to stdout: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
