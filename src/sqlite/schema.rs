// ABOUTME: SQLite DDL for the ledger, the reference tables and their sequences
// ABOUTME: Idempotent: safe to run against an installed database

use anyhow::{Context, Result};

use super::sequences::{register_sequence, SEQUENCE_DDL};
use super::store::SqliteStore;
use crate::config::CaptureConfig;
use crate::utils::{quote_ident, validate_identifier};

/// Reference tables that get an emulated `id` sequence.
const REFERENCE_TABLES: &[&str] = &["system_parameters", "distributed_files", "member_classes"];

/// Create the ledger, the reference tables and `capture_sequences`.
pub fn install_schema(store: &SqliteStore, capture: &CaptureConfig) -> Result<()> {
    validate_identifier(&capture.ledger_table).context("Invalid ledger table name")?;
    validate_identifier(&capture.node_column).context("Invalid node column name")?;

    let ledger = quote_ident(&capture.ledger_table);
    let node = quote_ident(&capture.node_column);
    let index = quote_ident(&format!("{}_table_record_idx", capture.ledger_table));

    let ddl = format!(
        "{SEQUENCE_DDL}
        CREATE TABLE IF NOT EXISTS {ledger} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operation TEXT NOT NULL CHECK (operation IN ('INSERT', 'UPDATE', 'DELETE')),
            table_name TEXT NOT NULL,
            record_id INTEGER NOT NULL,
            field_name TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT,
            user_name TEXT NOT NULL,
            \"timestamp\" TEXT NOT NULL,
            ha_node_name TEXT
        );
        CREATE INDEX IF NOT EXISTS {index} ON {ledger} (table_name, record_id);

        CREATE TABLE IF NOT EXISTS system_parameters (
            id INTEGER PRIMARY KEY,
            key TEXT NOT NULL,
            value TEXT,
            {node} TEXT NOT NULL,
            UNIQUE (key, {node})
        );

        CREATE TABLE IF NOT EXISTS distributed_files (
            id INTEGER PRIMARY KEY,
            file_name TEXT NOT NULL,
            file_data BLOB,
            content_identifier TEXT NOT NULL,
            file_updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            {node} TEXT NOT NULL,
            UNIQUE (content_identifier, version, {node})
        );

        CREATE TABLE IF NOT EXISTS member_classes (
            id INTEGER PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            description TEXT
        );"
    );

    let conn = store.connection();
    conn.execute_batch(&ddl)
        .context("Failed to install schema")?;
    for table in REFERENCE_TABLES {
        register_sequence(conn, table, "id")?;
    }

    tracing::info!(
        "Installed ledger {} and reference tables",
        capture.ledger_table
    );
    Ok(())
}
