// Statement Ledger - CLI
// Import bank statements, inspect holders

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use statement_ledger::config::{DbArgs, LogArgs};
use statement_ledger::db::{count_holders, count_transactions, list_holders, open_database};
use statement_ledger::{
    logging, parse_file, run_import, ConflictPolicy, ImportOptions, ImportOutcome, StatementFormat,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Import bank statements into a personal ledger without creating duplicates.
#[derive(Debug, Parser)]
#[command(name = "statement-ledger", version)]
struct Cli {
    #[command(flatten)]
    db: DbArgs,

    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database file and schema
    Init,

    /// Reconcile a statement against the ledger and commit the new rows
    Import(ImportArgs),

    /// Print all holders, favorites first
    Holders,
}

#[derive(Debug, clap::Args)]
struct ImportArgs {
    /// Statement format; guessed from the file name when omitted
    #[arg(long, value_enum)]
    format: Option<StatementFormat>,

    /// Statement file to import
    #[arg(long)]
    file: PathBuf,

    /// Write the plan as JSON to this file and commit nothing
    #[arg(long)]
    dry_file: Option<PathBuf>,

    /// Skip transactions that appear in the ledger between planning and commit
    #[arg(long)]
    skip_existing: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(&cli.log)?;

    match cli.command {
        Command::Init => run_init(&cli.db),
        Command::Import(args) => run_import_command(&cli.db, args).await,
        Command::Holders => run_holders(&cli.db),
    }
}

fn run_init(db: &DbArgs) -> Result<()> {
    println!("🔧 Setting up database...");
    let conn = open_database(&db.path)
        .with_context(|| format!("Failed to open database {}", db.path.display()))?;

    println!("✓ Database ready at {}", db.path.display());
    println!("   {} holders, {} transactions", count_holders(&conn)?, count_transactions(&conn)?);
    Ok(())
}

async fn run_import_command(db: &DbArgs, args: ImportArgs) -> Result<()> {
    println!("📥 Statement Import");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Parse
    println!("\n📂 Parsing {}...", args.file.display());
    let statement = parse_file(&args.file, args.format)?;
    println!(
        "✓ {} rows usable, {} skipped",
        statement.records.len(),
        statement.skipped.len()
    );
    for row in &statement.skipped {
        println!("   ⚠️  line {}: {}", row.line, row.reason);
    }

    // 2. Reconcile (and commit) off the async runtime; Ctrl-C cancels
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling import");
            interrupt.cancel();
        }
    });

    let options = ImportOptions {
        dry_run: args.dry_file.is_some(),
        conflict_policy: if args.skip_existing {
            ConflictPolicy::Skip
        } else {
            ConflictPolicy::Abort
        },
    };
    let db_path = db.path.clone();

    println!("\n⚖️  Reconciling against {}...", db_path.display());
    let outcome = tokio::task::spawn_blocking(move || -> Result<ImportOutcome> {
        let mut conn = open_database(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        Ok(run_import(&mut conn, &statement, &options, cancel)?)
    })
    .await
    .context("Import task panicked")??;

    println!("✓ {}", outcome.plan.summary());

    // 3. Report
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    match (&args.dry_file, outcome.report) {
        (Some(dry_file), _) => {
            let document = serde_json::to_string_pretty(&outcome.plan)?;
            std::fs::write(dry_file, document)
                .with_context(|| format!("Failed to write dry-run file {}", dry_file.display()))?;
            println!("📝 Dry run: plan written to {}", dry_file.display());
            println!("   Nothing was committed.");
        }
        (None, Some(report)) => {
            println!("✅ Import {} committed", outcome.run_id);
            println!("   {}", report.summary());
        }
        (None, None) => {
            anyhow::bail!("import finished without a commit report");
        }
    }

    Ok(())
}

fn run_holders(db: &DbArgs) -> Result<()> {
    let conn = open_database(&db.path)
        .with_context(|| format!("Failed to open database {}", db.path.display()))?;
    let holders = list_holders(&conn)?;

    if holders.is_empty() {
        println!("No holders yet. Import a statement first.");
        return Ok(());
    }

    println!("{:>5}  {:<1}  {:<12}  {:<34}  {}", "ID", "", "TYPE", "IDENTIFIER", "NAME");
    for holder in &holders {
        println!(
            "{:>5}  {:<1}  {:<12}  {:<34}  {}",
            holder.id,
            if holder.descriptor.favorite { "★" } else { "" },
            holder.identifier().kind,
            holder.identifier().identifier,
            holder.name()
        );
    }
    println!("\n{} holders", holders.len());

    Ok(())
}
