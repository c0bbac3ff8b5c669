// Statement Ledger - Core Library
// Exposes all modules for use in CLI, web server, and tests

pub mod config;
pub mod data;
pub mod db;
pub mod deduplication;
pub mod error;
pub mod import;
pub mod logging;
pub mod model;
pub mod parser;
pub mod reconciliation;
pub mod repository;
#[cfg(feature = "server")]
pub mod web;

// Re-export commonly used types
pub use data::RawData;
pub use db::{open_database, setup_database, ImportRun, SqliteStore};
pub use error::{ReconcileError, StoreError};
pub use import::{run_import, ImportOptions, ImportOutcome};
pub use model::{
    CandidateTransaction, HolderDescriptor, HolderIdentifier, NewTransaction, PersistedHolder,
    PersistedTransaction, TransactionBody,
};
pub use parser::{
    detect_format, get_parser, parse_file, ParsedStatement, SkippedRow, StatementFormat,
    StatementParser, StatementRecord,
};
pub use reconciliation::{CommitReport, ConflictPolicy, ReconciliationEngine, ReconciliationPlan};
pub use repository::{HolderRepository, TransactionRepository};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
