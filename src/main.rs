// ABOUTME: CLI entry point for change-ledger
// ABOUTME: Parses commands, opens the configured database and routes to handlers

use anyhow::Context;
use change_ledger::commands;
use change_ledger::config::Config;
use change_ledger::store::Store;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "change-ledger")]
#[command(about = "Field-level change capture and node identity tooling for PostgreSQL and SQLite", long_about = None)]
#[command(version)]
struct Cli {
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Path to config.toml (defaults to ~/.change-ledger/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// PostgreSQL URL or SQLite file path (overrides database.url)
    #[arg(long = "database-url", env = "CHANGE_LEDGER_DATABASE_URL", global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the audit ledger and the reference tables
    InstallSchema,
    /// Show whether the database runs single-node or multi-master
    Topology {
        /// Print the topology as JSON
        #[arg(long)]
        json: bool,
    },
    /// Advance every sequence past the maximum value of its column
    ReconcileSequences,
    /// List cluster nodes with their address and last distributed configuration
    ClusterStatus {
        /// Print the nodes as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the audit history of one record
    History {
        /// Table the record lives in
        #[arg(long)]
        table: String,
        /// Identity of the record
        #[arg(long = "record-id")]
        record_id: i64,
        /// Print the entries as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    change_ledger::postgres::connection::init_tls_policy(cli.allow_self_signed_certs);

    let config = Config::load(cli.config.as_deref())?;
    let url = config.database_url(cli.database_url.as_deref())?;
    let store = Store::open(&url, &config)
        .await
        .context("Failed to open database")?;

    match cli.command {
        Commands::InstallSchema => commands::install_schema(&store, &config).await,
        Commands::Topology { json } => commands::topology(&store, &config, json).await,
        Commands::ReconcileSequences => commands::reconcile_sequences(&store, &config).await,
        Commands::ClusterStatus { json } => commands::cluster_status(&store, &config, json).await,
        Commands::History {
            table,
            record_id,
            json,
        } => commands::history(&store, &config, &table, record_id, json).await,
    }
}
