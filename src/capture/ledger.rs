// ABOUTME: Audit ledger types and the audit writer (one entry per changed field)
// ABOUTME: Appends through a LedgerSink bound to the caller's open transaction

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::diff::ChangedField;

/// Kind of mutation recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(anyhow!("unknown ledger operation: {other}")),
        }
    }
}

/// A ledger row about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub operation: Operation,
    pub entity_table: String,
    pub record_id: i64,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
    pub node_name: Option<String>,
}

/// A ledger row as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub operation: Operation,
    pub entity_table: String,
    pub record_id: i64,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
    pub node_name: Option<String>,
}

/// Append-only access to the ledger inside an open transaction.
#[allow(async_fn_in_trait)]
pub trait LedgerSink {
    /// Insert one entry into `ledger_table` and return its identity. Must not
    /// commit or roll back.
    async fn append(&mut self, ledger_table: &str, entry: &NewAuditEntry) -> Result<i64>;
}

/// Who and when a captured write is credited to.
#[derive(Debug, Clone)]
pub struct Attribution<'a> {
    pub actor: &'a str,
    pub occurred_at: DateTime<Utc>,
    pub node_name: Option<&'a str>,
}

/// Turns a diff into ledger entries.
#[derive(Debug, Clone)]
pub struct AuditWriter {
    ledger_table: String,
}

impl AuditWriter {
    pub fn new(ledger_table: impl Into<String>) -> Self {
        Self {
            ledger_table: ledger_table.into(),
        }
    }

    pub fn ledger_table(&self) -> &str {
        &self.ledger_table
    }

    /// Build the entries for `changes` without persisting them.
    ///
    /// INSERT keeps only the new value, DELETE only the old value, UPDATE both.
    pub fn entries(
        &self,
        operation: Operation,
        entity_table: &str,
        record_id: i64,
        changes: &[ChangedField],
        attribution: &Attribution<'_>,
    ) -> Vec<NewAuditEntry> {
        changes
            .iter()
            .map(|change| {
                let (old_value, new_value) = match operation {
                    Operation::Insert => (None, change.new_value.clone()),
                    Operation::Update => (change.old_value.clone(), change.new_value.clone()),
                    Operation::Delete => (change.old_value.clone(), None),
                };
                NewAuditEntry {
                    operation,
                    entity_table: entity_table.to_string(),
                    record_id,
                    field_name: change.name.clone(),
                    old_value,
                    new_value,
                    actor: attribution.actor.to_string(),
                    occurred_at: attribution.occurred_at,
                    node_name: attribution.node_name.map(str::to_string),
                }
            })
            .collect()
    }

    /// Append one ledger entry per changed field through `sink`.
    ///
    /// Returns the number of entries written; zero when `changes` is empty.
    pub async fn write<L: LedgerSink>(
        &self,
        sink: &mut L,
        operation: Operation,
        entity_table: &str,
        record_id: i64,
        changes: &[ChangedField],
        attribution: &Attribution<'_>,
    ) -> Result<usize> {
        let entries = self.entries(operation, entity_table, record_id, changes, attribution);
        for entry in &entries {
            sink.append(&self.ledger_table, entry).await?;
        }
        Ok(entries.len())
    }
}
