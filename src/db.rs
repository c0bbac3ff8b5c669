// 🗄️ SQLite store - holders, transactions and import runs
//
// Uniqueness is enforced here, not in memory: holders are unique by
// (type, identifier) and transactions by their content fingerprint. This is
// the only guard against two imports racing on the same statement.

use crate::data::RawData;
use crate::deduplication::find_duplicate;
use crate::error::StoreError;
use crate::model::{
    HolderDescriptor, HolderIdentifier, NewTransaction, PersistedHolder, PersistedTransaction,
    TransactionBody,
};
use crate::repository::{HolderRepository, TransactionRepository};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

const HOLDER_COLUMNS: &str =
    "id, type, identifier, name, parent_holder_id, favorite, data, created_at";

const TRANSACTION_COLUMNS: &str =
    "id, from_holder_id, to_holder_id, amount, timestamp, data, parent_transaction_id, created_at";

// ============================================================================
// SCHEMA
// ============================================================================

/// Open (or create) a database file and make sure the schema exists.
pub fn open_database(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<(), StoreError> {
    // WAL for crash recovery; in-memory databases answer "memory"
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS holders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            identifier TEXT NOT NULL,
            name TEXT NOT NULL,
            parent_holder_id INTEGER REFERENCES holders(id),
            favorite INTEGER NOT NULL DEFAULT 0,
            data TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (type, identifier)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_holder_id INTEGER NOT NULL REFERENCES holders(id),
            to_holder_id INTEGER NOT NULL REFERENCES holders(id),
            amount INTEGER NOT NULL CHECK (amount >= 0),
            timestamp TEXT NOT NULL,
            data TEXT,
            data_hash TEXT NOT NULL,
            parent_transaction_id INTEGER REFERENCES transactions(id),
            created_at TEXT NOT NULL,
            UNIQUE (from_holder_id, to_holder_id, amount, timestamp, data_hash)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            source TEXT NOT NULL,
            format TEXT NOT NULL,
            holders_created INTEGER NOT NULL,
            transactions_created INTEGER NOT NULL,
            conflicts_skipped INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_from ON transactions(from_holder_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_to ON transactions(to_holder_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_holders_favorite ON holders(favorite DESC, id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// COLUMN CONVERSIONS
// ============================================================================

/// Timestamps are stored as RFC 3339 text in UTC. The same instant always
/// yields the same text, so exact-match lookups can compare strings.
fn timestamp_column(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(column: &'static str, text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidColumn {
            column,
            reason: e.to_string(),
        })
}

fn amount_column(amount: u64) -> Result<i64, StoreError> {
    i64::try_from(amount).map_err(|_| StoreError::AmountOutOfRange(amount))
}

fn parse_amount(amount: i64) -> Result<u64, StoreError> {
    u64::try_from(amount).map_err(|_| StoreError::InvalidColumn {
        column: "amount",
        reason: format!("negative amount {}", amount),
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Raw holder columns, converted outside of rusqlite's row callback so that
/// conversion failures keep their own error type.
struct HolderRow {
    id: i64,
    kind: String,
    identifier: String,
    name: String,
    parent_holder_id: Option<i64>,
    favorite: bool,
    data: Option<String>,
    created_at: String,
}

impl HolderRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(HolderRow {
            id: row.get(0)?,
            kind: row.get(1)?,
            identifier: row.get(2)?,
            name: row.get(3)?,
            parent_holder_id: row.get(4)?,
            favorite: row.get(5)?,
            data: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_holder(self) -> Result<PersistedHolder, StoreError> {
        Ok(PersistedHolder {
            id: self.id,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            descriptor: HolderDescriptor {
                identifier: HolderIdentifier::new(self.kind, self.identifier),
                name: self.name,
                parent_holder_id: self.parent_holder_id,
                favorite: self.favorite,
                data: RawData::parse(self.data.as_deref())?,
            },
        })
    }
}

struct TransactionRow {
    id: i64,
    from_holder_id: i64,
    to_holder_id: i64,
    amount: i64,
    timestamp: String,
    data: Option<String>,
    parent_transaction_id: Option<i64>,
    created_at: String,
}

impl TransactionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(TransactionRow {
            id: row.get(0)?,
            from_holder_id: row.get(1)?,
            to_holder_id: row.get(2)?,
            amount: row.get(3)?,
            timestamp: row.get(4)?,
            data: row.get(5)?,
            parent_transaction_id: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_transaction(self) -> Result<PersistedTransaction, StoreError> {
        Ok(PersistedTransaction {
            id: self.id,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            from_holder_id: self.from_holder_id,
            to_holder_id: self.to_holder_id,
            transaction: TransactionBody {
                amount: parse_amount(self.amount)?,
                timestamp: parse_timestamp("timestamp", &self.timestamp)?,
                data: RawData::parse(self.data.as_deref())?,
                parent_transaction_id: self.parent_transaction_id,
            },
        })
    }
}

// ============================================================================
// REPOSITORY IMPLEMENTATION
// ============================================================================

/// Repository over a borrowed connection.
///
/// Pass a `rusqlite::Transaction` (it derefs to `Connection`) to make every
/// write of a commit part of one storage transaction.
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteStore { conn }
    }
}

impl HolderRepository for SqliteStore<'_> {
    fn find_by_identity(
        &self,
        identifier: &HolderIdentifier,
    ) -> Result<Option<PersistedHolder>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM holders WHERE type = ?1 AND identifier = ?2",
                    HOLDER_COLUMNS
                ),
                params![identifier.kind, identifier.identifier],
                HolderRow::from_row,
            )
            .optional()?;

        row.map(HolderRow::into_holder).transpose()
    }

    fn insert_holder(&self, descriptor: &HolderDescriptor) -> Result<PersistedHolder, StoreError> {
        let created_at = Utc::now();

        self.conn.execute(
            "INSERT INTO holders (type, identifier, name, parent_holder_id, favorite, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                descriptor.identifier.kind,
                descriptor.identifier.identifier,
                descriptor.name,
                descriptor.parent_holder_id,
                descriptor.favorite,
                descriptor.data.to_column(),
                timestamp_column(&created_at),
            ],
        )?;

        Ok(PersistedHolder {
            id: self.conn.last_insert_rowid(),
            created_at,
            descriptor: descriptor.clone(),
        })
    }
}

impl TransactionRepository for SqliteStore<'_> {
    fn find_candidates(
        &self,
        from_holder_id: i64,
        to_holder_id: i64,
        amount: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<PersistedTransaction>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM transactions
             WHERE from_holder_id = ?1
             AND to_holder_id = ?2
             AND amount = ?3
             AND timestamp = ?4
             ORDER BY id",
            TRANSACTION_COLUMNS
        ))?;

        let rows = stmt
            .query_map(
                params![
                    from_holder_id,
                    to_holder_id,
                    amount_column(amount)?,
                    timestamp_column(&timestamp),
                ],
                TransactionRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(TransactionRow::into_transaction).collect()
    }

    fn insert_transaction(
        &self,
        transaction: &NewTransaction,
    ) -> Result<PersistedTransaction, StoreError> {
        let body = &transaction.transaction;

        let existing = self.find_candidates(
            transaction.from_holder_id,
            transaction.to_holder_id,
            body.amount,
            body.timestamp,
        )?;
        if find_duplicate(&existing, body).is_some() {
            return Err(StoreError::AlreadyExists);
        }

        let created_at = Utc::now();
        let result = self.conn.execute(
            "INSERT INTO transactions (
                from_holder_id, to_holder_id, amount, timestamp,
                data, data_hash, parent_transaction_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                transaction.from_holder_id,
                transaction.to_holder_id,
                amount_column(body.amount)?,
                timestamp_column(&body.timestamp),
                body.data.to_column(),
                body.data.fingerprint(),
                body.parent_transaction_id,
                timestamp_column(&created_at),
            ],
        );

        match result {
            Ok(_) => Ok(PersistedTransaction {
                id: self.conn.last_insert_rowid(),
                created_at,
                from_holder_id: transaction.from_holder_id,
                to_holder_id: transaction.to_holder_id,
                transaction: body.clone(),
            }),
            // Written by a concurrent import between our check and the insert
            Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// READ QUERIES (web view, CLI)
// ============================================================================

/// All holders, favorites first.
pub fn list_holders(conn: &Connection) -> Result<Vec<PersistedHolder>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM holders ORDER BY favorite DESC, id ASC",
        HOLDER_COLUMNS
    ))?;

    let rows = stmt
        .query_map([], HolderRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(HolderRow::into_holder).collect()
}

pub fn get_holder(conn: &Connection, id: i64) -> Result<Option<PersistedHolder>, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM holders WHERE id = ?1", HOLDER_COLUMNS),
            [id],
            HolderRow::from_row,
        )
        .optional()?;

    row.map(HolderRow::into_holder).transpose()
}

/// Transactions where the holder is either side, newest first.
pub fn list_transactions_for_holder(
    conn: &Connection,
    holder_id: i64,
) -> Result<Vec<PersistedTransaction>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transactions
         WHERE from_holder_id = ?1 OR to_holder_id = ?1
         ORDER BY timestamp DESC, id DESC",
        TRANSACTION_COLUMNS
    ))?;

    let rows = stmt
        .query_map([holder_id], TransactionRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(TransactionRow::into_transaction).collect()
}

pub fn count_holders(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM holders", [], |row| row.get(0))?)
}

pub fn count_transactions(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?)
}

// ============================================================================
// IMPORT RUNS (audit trail)
// ============================================================================

/// One committed import, recorded in the same storage transaction as its rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRun {
    pub run_id: Uuid,
    pub source: String,
    pub format: String,
    pub holders_created: usize,
    pub transactions_created: usize,
    pub conflicts_skipped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub fn insert_import_run(conn: &Connection, run: &ImportRun) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO import_runs (
            run_id, source, format, holders_created, transactions_created,
            conflicts_skipped, started_at, finished_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run.run_id.to_string(),
            run.source,
            run.format,
            run.holders_created as i64,
            run.transactions_created as i64,
            run.conflicts_skipped as i64,
            timestamp_column(&run.started_at),
            timestamp_column(&run.finished_at),
        ],
    )?;

    Ok(())
}

/// Import runs, most recent first.
pub fn list_import_runs(conn: &Connection) -> Result<Vec<ImportRun>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT run_id, source, format, holders_created, transactions_created,
                conflicts_skipped, started_at, finished_at
         FROM import_runs
         ORDER BY id DESC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(run_id, source, format, holders, transactions, skipped, started_at, finished_at)| {
                Ok(ImportRun {
                    run_id: Uuid::parse_str(&run_id).map_err(|e| StoreError::InvalidColumn {
                        column: "run_id",
                        reason: e.to_string(),
                    })?,
                    source,
                    format,
                    holders_created: holders.max(0) as usize,
                    transactions_created: transactions.max(0) as usize,
                    conflicts_skipped: skipped.max(0) as usize,
                    started_at: parse_timestamp("started_at", &started_at)?,
                    finished_at: parse_timestamp("finished_at", &finished_at)?,
                })
            },
        )
        .collect()
}
