// ABOUTME: history command - prints the audit ledger of one record
// ABOUTME: Oldest entry first, optionally as JSON

use anyhow::{Context, Result};

use crate::config::Config;
use crate::store::Store;
use crate::utils::validate_identifier;

pub async fn history(
    store: &Store,
    config: &Config,
    table: &str,
    record_id: i64,
    json: bool,
) -> Result<()> {
    validate_identifier(table).context("Invalid table name")?;
    let entries = store.ledger_for_record(config, table, record_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No history for {} id {}", table, record_id);
        return Ok(());
    }

    for entry in &entries {
        println!(
            "{} {:<6} {} {}: {} -> {} by {}{}",
            entry.occurred_at.format("%Y-%m-%d %H:%M:%S"),
            entry.operation,
            entry.entity_table,
            entry.field_name,
            entry.old_value.as_deref().unwrap_or("NULL"),
            entry.new_value.as_deref().unwrap_or("NULL"),
            entry.actor,
            entry
                .node_name
                .as_deref()
                .map(|node| format!(" on {}", node))
                .unwrap_or_default(),
        );
    }
    Ok(())
}
