// ABOUTME: Static registry of tracked and node-partitioned tables
// ABOUTME: Built once at startup; validates every hook registration

use anyhow::{Context, Result};
use std::collections::BTreeMap;

use super::error::CaptureError;
use super::hook::HookSpec;
use super::interceptor::ChangeInterceptor;
use crate::config::CaptureConfig;
use crate::entities::TrackedEntity;
use crate::node::NodeTagger;
use crate::utils::validate_identifier;

/// Frozen table configuration of the capture layer.
#[derive(Debug, Clone)]
pub struct CaptureRegistry {
    ledger_table: String,
    tracked: BTreeMap<String, HookSpec>,
    partitioned: BTreeMap<String, HookSpec>,
}

impl CaptureRegistry {
    pub fn builder(ledger_table: impl Into<String>) -> CaptureRegistryBuilder {
        CaptureRegistryBuilder {
            ledger_table: ledger_table.into(),
            tracked: Vec::new(),
            partitioned: Vec::new(),
        }
    }

    /// Registry described by the `[capture]` configuration section.
    pub fn from_config(config: &CaptureConfig) -> Result<Self> {
        let mut builder = Self::builder(config.ledger_table.clone());
        for entry in &config.tracked_tables {
            builder = builder.track_with(entry.name(), entry.hook_spec(HookSpec::AFTER_ROW));
        }
        for entry in &config.node_partitioned_tables {
            builder = builder.partition_with(entry.name(), entry.hook_spec(HookSpec::BEFORE_ROW));
        }
        builder.build()
    }

    pub fn ledger_table(&self) -> &str {
        &self.ledger_table
    }

    pub fn is_ledger(&self, table: &str) -> bool {
        table == self.ledger_table
    }

    pub fn is_tracked(&self, table: &str) -> bool {
        self.tracked.contains_key(table)
    }

    pub fn is_partitioned(&self, table: &str) -> bool {
        self.partitioned.contains_key(table)
    }

    pub fn tracked_tables(&self) -> impl Iterator<Item = &str> {
        self.tracked.keys().map(String::as_str)
    }

    pub fn partitioned_tables(&self) -> impl Iterator<Item = &str> {
        self.partitioned.keys().map(String::as_str)
    }
}

pub struct CaptureRegistryBuilder {
    ledger_table: String,
    tracked: Vec<(String, HookSpec)>,
    partitioned: Vec<(String, HookSpec)>,
}

impl CaptureRegistryBuilder {
    /// Track `table` with the change interceptor (AFTER ROW).
    pub fn track(self, table: impl Into<String>) -> Self {
        self.track_with(table, HookSpec::AFTER_ROW)
    }

    pub fn track_with(mut self, table: impl Into<String>, spec: HookSpec) -> Self {
        self.tracked.push((table.into(), spec));
        self
    }

    /// Tag `table` with the owning node (BEFORE ROW).
    pub fn partition(self, table: impl Into<String>) -> Self {
        self.partition_with(table, HookSpec::BEFORE_ROW)
    }

    pub fn partition_with(mut self, table: impl Into<String>, spec: HookSpec) -> Self {
        self.partitioned.push((table.into(), spec));
        self
    }

    /// Register a typed entity according to its declared capabilities.
    pub fn register_entity<E: TrackedEntity>(mut self) -> Self {
        if E::TRACKED {
            self = self.track(E::TABLE);
        }
        if E::NODE_PARTITIONED {
            self = self.partition(E::TABLE);
        }
        self
    }

    /// Validate every registration and freeze the registry.
    ///
    /// Fails on the first bad registration; an invalid hook is a wiring defect
    /// and must stop startup.
    pub fn build(self) -> Result<CaptureRegistry> {
        validate_identifier(&self.ledger_table).context("Invalid ledger table name")?;

        let mut tracked = BTreeMap::new();
        for (table, spec) in self.tracked {
            validate_identifier(&table)
                .with_context(|| format!("Invalid tracked table name '{}'", table))?;
            if table == self.ledger_table {
                return Err(CaptureError::LedgerTableTracked(table).into());
            }
            ChangeInterceptor::validate_registration(&table, spec)?;
            tracked.insert(table, spec);
        }

        let mut partitioned = BTreeMap::new();
        for (table, spec) in self.partitioned {
            validate_identifier(&table)
                .with_context(|| format!("Invalid node-partitioned table name '{}'", table))?;
            NodeTagger::validate_registration(&table, spec)?;
            partitioned.insert(table, spec);
        }

        tracing::debug!(
            "Capture registry: {} tracked table(s), {} node-partitioned table(s), ledger '{}'",
            tracked.len(),
            partitioned.len(),
            self.ledger_table
        );

        Ok(CaptureRegistry {
            ledger_table: self.ledger_table,
            tracked,
            partitioned,
        })
    }
}
