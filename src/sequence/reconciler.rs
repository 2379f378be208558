// ABOUTME: Sequence reconciler - advances every tracked sequence past its column's maximum
// ABOUTME: Advance-only and idempotent; failures are isolated per sequence

use anyhow::{bail, Context, Result};
use std::fmt;

use super::catalog::{CatalogEntry, SequenceBinding};
use crate::config::{ReconcileConfig, TopologyConfig};
use crate::node::Topology;

/// Sequence access needed by the reconciler.
#[allow(async_fn_in_trait)]
pub trait SequenceStore {
    /// Every sequence that feeds a table column, as the catalog reports it.
    async fn sequence_catalog(&self) -> Result<Vec<CatalogEntry>>;

    /// `max(column)` over the table, 0 when empty.
    async fn observed_max(&self, binding: &SequenceBinding) -> Result<i64>;

    /// The value the next draw would return, without drawing it.
    async fn peek_next(&self, binding: &SequenceBinding) -> Result<i64>;

    /// Draw the next value (`nextval`).
    async fn draw_next(&self, binding: &SequenceBinding) -> Result<i64>;

    /// Run the catch-up loop on every node through the replication extension.
    async fn replicate_catch_up(
        &self,
        binding: &SequenceBinding,
        replicate_function: &str,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceMode {
    Local,
    Replicated,
}

impl fmt::Display for AdvanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvanceMode::Local => f.write_str("local"),
            AdvanceMode::Replicated => f.write_str("replicated"),
        }
    }
}

/// Result of reconciling one sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceOutcome {
    pub binding: SequenceBinding,
    pub observed_max: i64,
    /// Values drawn locally; `None` when the catch-up ran through replication.
    pub draws: Option<u64>,
    /// The next value the sequence will hand out.
    pub upcoming: i64,
    pub mode: AdvanceMode,
}

impl SequenceOutcome {
    pub fn advanced(&self) -> bool {
        self.draws != Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceFailure {
    pub sequence: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub outcomes: Vec<SequenceOutcome>,
    pub errors: Vec<SequenceFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total local draws across all sequences.
    pub fn total_draws(&self) -> u64 {
        self.outcomes.iter().filter_map(|o| o.draws).sum()
    }
}

pub struct Reconciler {
    topology: Topology,
    max_draws: u64,
    replicate_function: String,
}

impl Reconciler {
    pub fn new(topology: Topology, max_draws: u64, replicate_function: impl Into<String>) -> Self {
        Self {
            topology,
            max_draws,
            replicate_function: replicate_function.into(),
        }
    }

    pub fn from_config(
        topology: Topology,
        reconcile: &ReconcileConfig,
        topology_config: &TopologyConfig,
    ) -> Self {
        Self::new(
            topology,
            reconcile.max_draws_per_sequence,
            topology_config.replicate_function.clone(),
        )
    }

    /// Reconcile every sequence in the catalog.
    ///
    /// Only a failure to read the catalog itself is returned as an error;
    /// per-sequence problems are collected in the report and the pass moves
    /// on. Not safe to run concurrently with itself.
    pub async fn run<S: SequenceStore>(&self, store: &S) -> Result<ReconcileReport> {
        let catalog = store
            .sequence_catalog()
            .await
            .context("Failed to read sequence catalog")?;

        tracing::info!(
            "Reconciling {} sequence(s) ({})",
            catalog.len(),
            if self.topology.is_multi_master() {
                "replicated"
            } else {
                "local"
            }
        );

        let mut report = ReconcileReport::default();
        for entry in catalog {
            let binding = match entry.bind() {
                Ok(binding) => binding,
                Err(e) => {
                    tracing::warn!("Skipping sequence {}: {:#}", entry.label(), e);
                    report.errors.push(SequenceFailure {
                        sequence: entry.label(),
                        error: format!("{:#}", e),
                    });
                    continue;
                }
            };

            match self.reconcile_one(store, &binding).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    tracing::error!("Failed to reconcile sequence {}: {:#}", binding, e);
                    report.errors.push(SequenceFailure {
                        sequence: binding.to_string(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        tracing::info!(
            "Sequence reconciliation finished: {} reconciled, {} failed, {} value(s) drawn",
            report.outcomes.len(),
            report.errors.len(),
            report.total_draws()
        );

        Ok(report)
    }

    /// Bring one sequence past `max(column)`.
    pub async fn reconcile_one<S: SequenceStore>(
        &self,
        store: &S,
        binding: &SequenceBinding,
    ) -> Result<SequenceOutcome> {
        let observed_max = store
            .observed_max(binding)
            .await
            .with_context(|| format!("Failed to read max({}) of {}", binding.column, binding.table))?;
        let upcoming = store
            .peek_next(binding)
            .await
            .with_context(|| format!("Failed to read state of sequence {}", binding.sequence))?;

        let mode = if self.topology.is_multi_master() {
            AdvanceMode::Replicated
        } else {
            AdvanceMode::Local
        };

        // Replicated catch-up runs on every node, even when this one is ahead.
        if mode == AdvanceMode::Local && upcoming > observed_max {
            tracing::debug!(
                "Sequence {} already ahead (next {} > max {})",
                binding,
                upcoming,
                observed_max
            );
            return Ok(SequenceOutcome {
                binding: binding.clone(),
                observed_max,
                draws: Some(0),
                upcoming,
                mode,
            });
        }

        let draws = match mode {
            AdvanceMode::Local => Some(self.draw_past(store, binding, observed_max).await?),
            AdvanceMode::Replicated => {
                store
                    .replicate_catch_up(binding, &self.replicate_function)
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to replicate catch-up of {} via {}",
                            binding.sequence, self.replicate_function
                        )
                    })?;
                None
            }
        };

        let upcoming = store.peek_next(binding).await?;
        if upcoming <= observed_max {
            bail!(
                "sequence {} still behind after catch-up (next {} <= max {})",
                binding,
                upcoming,
                observed_max
            );
        }

        tracing::info!(
            "Advanced sequence {} past max {} (next value {})",
            binding,
            observed_max,
            upcoming
        );

        Ok(SequenceOutcome {
            binding: binding.clone(),
            observed_max,
            draws,
            upcoming,
            mode,
        })
    }

    async fn draw_past<S: SequenceStore>(
        &self,
        store: &S,
        binding: &SequenceBinding,
        observed_max: i64,
    ) -> Result<u64> {
        let mut draws = 0u64;
        loop {
            if draws >= self.max_draws {
                bail!(
                    "gave up after {} draws without passing max {}",
                    draws,
                    observed_max
                );
            }
            let drawn = store.draw_next(binding).await?;
            draws += 1;
            if drawn > observed_max {
                return Ok(draws);
            }
        }
    }
}
