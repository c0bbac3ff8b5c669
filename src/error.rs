// ⚠️ Error taxonomy for the store and the reconciliation engine
//
// Parse errors never reach this module: the format adapter skips bad rows and
// reports them in its own outcome.

use thiserror::Error;

/// Failure reported by a repository implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// An equivalent transaction is already stored.
    #[error("transaction already exists")]
    AlreadyExists,

    #[error("amount {0} does not fit the storage column")]
    AmountOutOfRange(u64),

    #[error("invalid stored value in column {column}: {reason}")]
    InvalidColumn { column: &'static str, reason: String },
}

/// Failure of a reconciliation run (plan building or commit).
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The ambient cancellation token fired before a repository round trip.
    #[error("import cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Repository {
        context: String,
        #[source]
        source: StoreError,
    },

    /// The transaction repository rejected an insert because the row slipped
    /// past plan-time de-duplication.
    #[error("{context}: transaction already exists")]
    AlreadyExists { context: String },

    /// Internal logic fault. Never coerced into a recoverable outcome.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl ReconcileError {
    pub fn repository(context: impl Into<String>, source: StoreError) -> Self {
        match source {
            StoreError::AlreadyExists => ReconcileError::AlreadyExists {
                context: context.into(),
            },
            source => ReconcileError::Repository {
                context: context.into(),
                source,
            },
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ReconcileError::AlreadyExists { .. })
    }
}
