// ABOUTME: reconcile-sequences command - advances sequences past their columns' maximum
// ABOUTME: Prints a per-sequence summary and fails if any sequence could not be reconciled

use anyhow::{bail, Result};

use crate::config::Config;
use crate::sequence::Reconciler;
use crate::store::Store;

pub async fn reconcile_sequences(store: &Store, config: &Config) -> Result<()> {
    let topology = store.detect_topology(config).await?;
    let reconciler = Reconciler::from_config(topology, &config.reconcile, &config.topology);
    let report = store.reconcile_sequences(&reconciler).await?;

    for outcome in &report.outcomes {
        let action = match outcome.draws {
            Some(0) => "already ahead".to_string(),
            Some(draws) => format!("advanced by {} draw(s)", draws),
            None => "catch-up replicated to all nodes".to_string(),
        };
        println!(
            "{}: max {}, next {} ({})",
            outcome.binding, outcome.observed_max, outcome.upcoming, action
        );
    }
    for failure in &report.errors {
        println!("{}: FAILED: {}", failure.sequence, failure.error);
    }

    println!(
        "Reconciled {} sequence(s), {} failed, {} value(s) drawn",
        report.outcomes.len(),
        report.errors.len(),
        report.total_draws()
    );

    if !report.is_clean() {
        bail!("{} sequence(s) could not be reconciled", report.errors.len());
    }
    Ok(())
}
