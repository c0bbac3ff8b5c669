// ⚙️ Shared command-line configuration
//
// Flattened into both binaries. Every flag falls back to an environment
// variable, and `.env` is loaded by the binaries before parsing.

use clap::{Args, ValueEnum};
use std::path::PathBuf;

/// Database location
#[derive(Debug, Clone, Args)]
pub struct DbArgs {
    /// SQLite database file
    #[arg(long = "db", env = "LEDGER_DB", default_value = "ledger.db", global = true)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Args)]
pub struct LogArgs {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Minimum log level (debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,
}
