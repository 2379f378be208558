// ABOUTME: install-schema command - creates the ledger and the reference tables
// ABOUTME: Safe to re-run against an installed database

use anyhow::{Context, Result};

use crate::config::Config;
use crate::store::Store;

pub async fn install_schema(store: &Store, config: &Config) -> Result<()> {
    tracing::info!("Installing schema on {} database", store.backend());
    store
        .install_schema(config)
        .await
        .context("Schema installation failed")?;
    println!(
        "Schema installed: ledger table '{}' is ready",
        config.capture.ledger_table
    );
    Ok(())
}
