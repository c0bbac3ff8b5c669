// Statement Ledger - Web Server
// Read-only view of holders, transactions and import runs

use anyhow::{Context, Result};
use clap::Parser;
use statement_ledger::config::{DbArgs, LogArgs};
use statement_ledger::db::open_database;
use statement_ledger::logging;
use statement_ledger::web::{router, AppState};
use tracing::info;

/// Serve the ledger web view.
#[derive(Debug, Parser)]
#[command(name = "ledger-server", version)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "LEDGER_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,

    #[command(flatten)]
    db: DbArgs,

    #[command(flatten)]
    log: LogArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(&cli.log)?;

    println!("🌐 Statement Ledger - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if !cli.db.path.exists() {
        eprintln!("❌ Database not found at {}", cli.db.path.display());
        eprintln!("   Run: statement-ledger --db {} init", cli.db.path.display());
        std::process::exit(1);
    }

    let conn = open_database(&cli.db.path)
        .with_context(|| format!("Failed to open database {}", cli.db.path.display()))?;
    println!("✓ Database opened: {}", cli.db.path.display());

    let app = router(AppState::new(conn));

    let listener = tokio::net::TcpListener::bind(&cli.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", cli.addr))?;

    println!("\n🚀 Server running on http://{}", cli.addr);
    println!("   API: http://{}/api/holders", cli.addr);
    println!("\n   Press Ctrl+C to stop\n");
    info!(addr = %cli.addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}
