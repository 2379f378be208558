// ABOUTME: PostgreSQL DDL for the ledger and the reference tables
// ABOUTME: Idempotent: every statement is CREATE ... IF NOT EXISTS

use anyhow::{Context, Result};

use super::store::PgStore;
use crate::config::CaptureConfig;
use crate::utils::{quote_ident, validate_identifier};

/// Create the ledger and reference tables in the store's schema.
pub async fn install_schema(store: &PgStore, capture: &CaptureConfig) -> Result<()> {
    validate_identifier(&capture.ledger_table).context("Invalid ledger table name")?;
    validate_identifier(&capture.node_column).context("Invalid node column name")?;

    let ledger = store.qualified(&capture.ledger_table);
    let node = quote_ident(&capture.node_column);
    let index = quote_ident(&format!("{}_table_record_idx", capture.ledger_table));

    let ddl = format!(
        "CREATE SCHEMA IF NOT EXISTS {schema};

        CREATE TABLE IF NOT EXISTS {ledger} (
            id bigserial PRIMARY KEY,
            operation text NOT NULL CHECK (operation IN ('INSERT', 'UPDATE', 'DELETE')),
            table_name text NOT NULL,
            record_id bigint NOT NULL,
            field_name text NOT NULL,
            old_value text,
            new_value text,
            user_name text NOT NULL,
            \"timestamp\" timestamptz NOT NULL,
            ha_node_name text
        );
        CREATE INDEX IF NOT EXISTS {index} ON {ledger} (table_name, record_id);

        CREATE TABLE IF NOT EXISTS {system_parameters} (
            id serial PRIMARY KEY,
            key varchar(255) NOT NULL,
            value text,
            {node} varchar(255) NOT NULL,
            UNIQUE (key, {node})
        );

        CREATE TABLE IF NOT EXISTS {distributed_files} (
            id serial PRIMARY KEY,
            file_name varchar(255) NOT NULL,
            file_data bytea,
            content_identifier varchar(255) NOT NULL,
            file_updated_at timestamp NOT NULL,
            version integer NOT NULL DEFAULT 0,
            {node} varchar(255) NOT NULL,
            UNIQUE (content_identifier, version, {node})
        );

        CREATE TABLE IF NOT EXISTS {member_classes} (
            id serial PRIMARY KEY,
            code varchar(255) NOT NULL UNIQUE,
            description text
        );",
        schema = quote_ident(store.schema()),
        system_parameters = store.qualified("system_parameters"),
        distributed_files = store.qualified("distributed_files"),
        member_classes = store.qualified("member_classes"),
    );

    store
        .client()
        .batch_execute(&ddl)
        .await
        .context("Failed to install schema")?;

    tracing::info!(
        "Installed ledger {} and reference tables in schema '{}'",
        capture.ledger_table,
        store.schema()
    );
    Ok(())
}
