//! # Queue Storage CLI
//!
//! Operator tooling for queue storage deployments backed by a filesystem
//! blob root.
//!
//! This module provides CLI commands for:
//! - Listing, showing and deleting persisted (quarantined) messages
//! - Validating and displaying the resolved provider settings
//! - Generating shell completions

use clap::{CommandFactory, Parser, Subcommand};
use queue_storage::{
    BlobStorageError, ConfigurationError, FilesystemBlobStorage, JsonDataSerializer,
    PersistedMessage, PersistedMessageStore, QueueStorageSettings,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue Storage CLI - inspect persisted messages
#[derive(Debug, Parser)]
#[command(name = "queue-storage")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and manage queue storage persisted messages")]
pub struct Cli {
    /// Root directory of the filesystem blob storage
    #[arg(short, long, env = "QSTORE_BLOB_ROOT", global = true)]
    pub root: Option<PathBuf>,

    /// Settings file (TOML, JSON or YAML)
    #[arg(short, long, env = "QSTORE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Persisted message store commands
    Persisted {
        #[command(subcommand)]
        action: PersistedCommands,
    },

    /// Validate and show the resolved settings
    Config {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Persisted message subcommands
///
/// The store defaults to the configured failing-messages store.
#[derive(Debug, Subcommand)]
pub enum PersistedCommands {
    /// List keys of a store
    List {
        /// Store name
        #[arg(short, long)]
        store: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one persisted message
    Show {
        /// Key of the persisted message
        key: String,

        /// Store name
        #[arg(short, long)]
        store: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete one persisted message
    Delete {
        /// Key of the persisted message
        key: String,

        /// Store name
        #[arg(short, long)]
        store: Option<String>,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Storage error: {0}")]
    Storage(#[from] BlobStorageError),

    #[error("Persisted message not found: {store}/{key}")]
    NotFound { store: String, key: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output serialization failed: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Storage(_) => 2,
            Self::NotFound { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
            Self::Output(_) => 6,
            Self::Logging { .. } => 7,
        }
    }
}

// ============================================================================
// Main CLI Functions
// ============================================================================

/// Parse arguments from the environment and run the CLI
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(&cli)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(cli, &mut out).await
}

/// Run a parsed command, writing its output to `out`
pub async fn run<W: Write>(cli: Cli, out: &mut W) -> Result<(), CliError> {
    let settings = QueueStorageSettings::load(cli.config.as_deref())?;
    debug!(settings = ?settings, "Settings loaded");

    match cli.command {
        Commands::Persisted { action } => {
            let root = cli.root.ok_or_else(|| CliError::InvalidArgument {
                arg: "--root".to_string(),
                message: "a blob storage root is required (or set QSTORE_BLOB_ROOT)".to_string(),
            })?;
            let store = open_store(&root).await?;
            execute_persisted_command(&store, &settings, action, out).await
        }
        Commands::Config { format } => write_settings(&settings, format, out),
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "queue-storage", out);
            Ok(())
        }
    }
}

fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
        arg: "--log-level".to_string(),
        message: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

async fn open_store(root: &Path) -> Result<PersistedMessageStore, CliError> {
    if !root.is_dir() {
        return Err(CliError::InvalidArgument {
            arg: "--root".to_string(),
            message: format!("'{}' is not a directory", root.display()),
        });
    }

    let storage = FilesystemBlobStorage::new(root.to_path_buf()).await?;
    Ok(PersistedMessageStore::new(Arc::new(storage)))
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn execute_persisted_command<W: Write>(
    store: &PersistedMessageStore,
    settings: &QueueStorageSettings,
    action: PersistedCommands,
    out: &mut W,
) -> Result<(), CliError> {
    match action {
        PersistedCommands::List { store: name, format } => {
            let name = name.unwrap_or_else(|| settings.failing_messages_store.clone());
            let keys = store.list(&name).await?;
            debug!(store_name = %name, count = keys.len(), "Listed persisted messages");

            match format {
                OutputFormat::Text => {
                    for key in &keys {
                        writeln!(out, "{key}")?;
                    }
                }
                OutputFormat::Json => {
                    serde_json::to_writer_pretty(&mut *out, &keys)?;
                    writeln!(out)?;
                }
            }
            Ok(())
        }
        PersistedCommands::Show {
            key,
            store: name,
            format,
        } => {
            let name = name.unwrap_or_else(|| settings.failing_messages_store.clone());
            let message = store
                .get(&name, &key, &JsonDataSerializer)
                .await?
                .ok_or_else(|| CliError::NotFound {
                    store: name.clone(),
                    key: key.clone(),
                })?;

            match format {
                OutputFormat::Text => write_message_text(&message, out)?,
                OutputFormat::Json => {
                    serde_json::to_writer_pretty(&mut *out, &message)?;
                    writeln!(out)?;
                }
            }
            Ok(())
        }
        PersistedCommands::Delete { key, store: name } => {
            let name = name.unwrap_or_else(|| settings.failing_messages_store.clone());
            if !store.delete(&name, &key).await? {
                return Err(CliError::NotFound { store: name, key });
            }
            info!(store_name = %name, key = %key, "Persisted message deleted");
            writeln!(out, "Deleted {name}/{key}")?;
            Ok(())
        }
    }
}

fn write_message_text<W: Write>(message: &PersistedMessage, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "Key:              {}", message.key)?;
    writeln!(out, "Store:            {}", message.store_name)?;
    writeln!(out, "Queue:            {}", message.queue_name)?;
    writeln!(out, "Reason:           {}", message.reason)?;
    writeln!(out, "Inserted:         {}", message.insertion_time)?;
    writeln!(out, "Persisted:        {}", message.persistence_time)?;
    writeln!(out, "Dequeue count:    {}", message.dequeue_count)?;
    writeln!(out, "Data available:   {}", message.is_data_available)?;
    if let Some(data) = &message.data_if_recoverable {
        writeln!(out, "Data:")?;
        writeln!(out, "{data}")?;
    }
    Ok(())
}

fn write_settings<W: Write>(
    settings: &QueueStorageSettings,
    format: OutputFormat,
    out: &mut W,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Text => {
            writeln!(
                out,
                "default_visibility_timeout_seconds = {}",
                settings.default_visibility_timeout_seconds
            )?;
            writeln!(out, "max_processing_trials = {}", settings.max_processing_trials)?;
            writeln!(
                out,
                "keep_alive_increment_seconds = {}",
                settings.keep_alive_increment_seconds
            )?;
            writeln!(
                out,
                "keep_alive_initial_delay_seconds = {}",
                settings.keep_alive_initial_delay_seconds
            )?;
            writeln!(
                out,
                "keep_alive_period_seconds = {}",
                settings.keep_alive_period_seconds
            )?;
            writeln!(out, "put_range_parallelism = {}", settings.put_range_parallelism)?;
            writeln!(out, "failing_messages_store = {}", settings.failing_messages_store)?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, settings)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
