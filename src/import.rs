// 📥 Import driver - statement in, rows out
//
// A dry run builds the plan against the live database and writes nothing.
// A real run builds and commits the plan inside one IMMEDIATE transaction,
// records the run in `import_runs`, and either all of it lands or none of it.

use crate::db::{insert_import_run, ImportRun, SqliteStore};
use crate::error::{ReconcileError, StoreError};
use crate::parser::ParsedStatement;
use crate::reconciliation::{CommitReport, ConflictPolicy, ReconciliationEngine, ReconciliationPlan};
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Build the plan only
    pub dry_run: bool,
    pub conflict_policy: ConflictPolicy,
}

impl ImportOptions {
    pub fn dry_run() -> Self {
        ImportOptions {
            dry_run: true,
            ..Default::default()
        }
    }

    /// Builder pattern: set conflict policy
    pub fn with_conflict_policy(mut self, conflict_policy: ConflictPolicy) -> Self {
        self.conflict_policy = conflict_policy;
        self
    }
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub run_id: Uuid,
    /// After a commit every holder of the plan is in `existing_holders`
    pub plan: ReconciliationPlan,
    /// `None` for a dry run
    pub report: Option<CommitReport>,
}

fn storage(context: &str) -> impl FnOnce(rusqlite::Error) -> ReconcileError + '_ {
    move |e| ReconcileError::repository(context, StoreError::from(e))
}

/// Reconcile a parsed statement against the database.
///
/// On any error of a real run the storage transaction is rolled back and the
/// plan is dropped: holder ids assigned inside the transaction no longer exist.
pub fn run_import(
    conn: &mut Connection,
    statement: &ParsedStatement,
    options: &ImportOptions,
    cancel: CancellationToken,
) -> Result<ImportOutcome, ReconcileError> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let span = info_span!(
        "import",
        %run_id,
        source = %statement.source,
        format = %statement.format,
        dry_run = options.dry_run
    );
    let _enter = span.enter();

    info!(
        records = statement.records.len(),
        skipped_rows = statement.skipped.len(),
        "import started"
    );

    if options.dry_run {
        let store = SqliteStore::new(conn);
        let plan = ReconciliationEngine::new(&store, &store, cancel)
            .with_conflict_policy(options.conflict_policy)
            .build_plan(&statement.records)?;

        info!(summary = %plan.summary(), "dry run finished");
        return Ok(ImportOutcome {
            run_id,
            plan,
            report: None,
        });
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(storage("begin import transaction"))?;

    let (plan, report) = {
        let store = SqliteStore::new(&tx);
        let engine = ReconciliationEngine::new(&store, &store, cancel)
            .with_conflict_policy(options.conflict_policy);

        let mut plan = engine.build_plan(&statement.records)?;
        let report = engine.commit(&mut plan)?;
        (plan, report)
    };

    let run = ImportRun {
        run_id,
        source: statement.source.clone(),
        format: statement.format.code().to_string(),
        holders_created: report.holders_created,
        transactions_created: report.transactions_created,
        conflicts_skipped: report.conflicts_skipped,
        started_at,
        finished_at: Utc::now(),
    };
    insert_import_run(&tx, &run)
        .map_err(|e| ReconcileError::repository("record import run", e))?;

    tx.commit().map_err(storage("commit import transaction"))?;

    info!(summary = %report.summary(), "import committed");
    Ok(ImportOutcome {
        run_id,
        plan,
        report: Some(report),
    })
}
