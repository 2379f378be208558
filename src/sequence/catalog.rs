// ABOUTME: Sequence catalog entries and validated (sequence, table, column) bindings
// ABOUTME: Also renders the replicated catch-up DO block for multi-master deployments

use anyhow::{Context, Result};
use std::fmt;

use crate::utils::{quote_ident, quote_literal, quote_qualified, validate_identifier};

/// A raw catalog row: the sequence and the column it feeds, as reported by
/// the storage engine. Any part may be missing when the catalog is damaged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CatalogEntry {
    pub schema: Option<String>,
    pub sequence: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
}

impl CatalogEntry {
    /// Best-effort label for diagnostics.
    pub fn label(&self) -> String {
        let part = |p: &Option<String>| p.clone().unwrap_or_else(|| "?".to_string());
        format!(
            "{} -> {}.{}",
            part(&self.sequence),
            part(&self.table),
            part(&self.column)
        )
    }

    /// Check every part and turn the entry into a usable binding.
    pub fn bind(&self) -> Result<SequenceBinding> {
        let require = |part: &Option<String>, what: &str| -> Result<String> {
            let value = part
                .clone()
                .filter(|v| !v.is_empty())
                .with_context(|| format!("catalog entry has no {}", what))?;
            validate_identifier(&value).with_context(|| format!("invalid {} name", what))?;
            Ok(value)
        };

        let schema = match &self.schema {
            Some(schema) => {
                validate_identifier(schema).context("invalid schema name")?;
                Some(schema.clone())
            }
            None => None,
        };

        Ok(SequenceBinding {
            schema,
            sequence: require(&self.sequence, "sequence")?,
            table: require(&self.table, "table")?,
            column: require(&self.column, "column")?,
        })
    }
}

/// A sequence and the identity column it generates values for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceBinding {
    pub schema: Option<String>,
    pub sequence: String,
    pub table: String,
    pub column: String,
}

impl SequenceBinding {
    pub fn quoted_sequence(&self) -> String {
        quote_qualified(self.schema.as_deref(), &self.sequence)
    }

    pub fn quoted_table(&self) -> String {
        quote_qualified(self.schema.as_deref(), &self.table)
    }

    pub fn quoted_column(&self) -> String {
        quote_ident(&self.column)
    }

    /// PL/pgSQL block that advances the sequence past the column's maximum.
    ///
    /// Sent through the replication extension so that every node runs the
    /// same loop against its own sequence state. A node whose sequence is
    /// already ahead draws nothing.
    pub fn catch_up_block(&self) -> String {
        let sequence = self.quoted_sequence();
        let regclass = quote_literal(&sequence);
        format!(
            "DO $catch_up$
DECLARE
    observed bigint;
    upcoming bigint;
BEGIN
    SELECT COALESCE(MAX({column}), 0)::bigint INTO observed FROM {table};
    SELECT CASE WHEN s.is_called THEN s.last_value + p.seqincrement ELSE s.last_value END
      INTO upcoming
      FROM {sequence} s, pg_catalog.pg_sequence p
     WHERE p.seqrelid = {regclass}::regclass;
    IF upcoming > observed THEN
        RETURN;
    END IF;
    LOOP
        EXIT WHEN nextval({regclass}::regclass) > observed;
    END LOOP;
END
$catch_up$",
            column = self.quoted_column(),
            table = self.quoted_table(),
            sequence = sequence,
            regclass = regclass,
        )
    }
}

impl fmt::Display for SequenceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(schema) = &self.schema {
            write!(f, "{}.", schema)?;
        }
        write!(f, "{} -> {}.{}", self.sequence, self.table, self.column)
    }
}
