// ABOUTME: Emulated sequences for SQLite (capture_sequences table)
// ABOUTME: Same last_value / is_called semantics as PostgreSQL nextval

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::store::SqliteStore;
use crate::sequence::{CatalogEntry, SequenceBinding, SequenceStore};

/// Table holding the emulated sequences.
pub const SEQUENCE_TABLE: &str = "capture_sequences";

pub(crate) const SEQUENCE_DDL: &str = "
CREATE TABLE IF NOT EXISTS capture_sequences (
    sequence_name TEXT PRIMARY KEY,
    table_name    TEXT,
    column_name   TEXT,
    last_value    INTEGER NOT NULL DEFAULT 1,
    increment_by  INTEGER NOT NULL DEFAULT 1,
    is_called     INTEGER NOT NULL DEFAULT 0
);
";

/// Register `<table>_<column>_seq` for an identity column, if not present.
pub fn register_sequence(conn: &Connection, table: &str, column: &str) -> Result<String> {
    let sequence = format!("{}_{}_seq", table, column);
    conn.execute(
        "INSERT OR IGNORE INTO capture_sequences (sequence_name, table_name, column_name) \
         VALUES (?1, ?2, ?3)",
        params![sequence, table, column],
    )
    .with_context(|| format!("Failed to register sequence {}", sequence))?;
    Ok(sequence)
}

/// The sequence feeding `table.column`, if the database has one registered.
pub fn owned_sequence(conn: &Connection, table: &str, column: &str) -> Result<Option<String>> {
    let has_sequences: bool = conn
        .query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [SEQUENCE_TABLE],
            |row| row.get(0),
        )
        .context("Failed to look for the sequence table")?;
    if !has_sequences {
        return Ok(None);
    }
    conn.query_row(
        "SELECT sequence_name FROM capture_sequences \
         WHERE table_name = ?1 AND column_name = ?2 \
         ORDER BY sequence_name LIMIT 1",
        [table, column],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("Failed to look up the sequence of {}.{}", table, column))
}

/// `nextval`: the first call after creation returns `last_value` itself.
pub fn next_value(conn: &Connection, sequence: &str) -> Result<i64> {
    conn.query_row(
        "UPDATE capture_sequences \
         SET last_value = CASE WHEN is_called THEN last_value + increment_by ELSE last_value END, \
             is_called = 1 \
         WHERE sequence_name = ?1 \
         RETURNING last_value",
        [sequence],
        |row| row.get(0),
    )
    .optional()?
    .with_context(|| format!("Sequence {} does not exist", sequence))
}

fn peek_value(conn: &Connection, sequence: &str) -> Result<i64> {
    conn.query_row(
        "SELECT CASE WHEN is_called THEN last_value + increment_by ELSE last_value END \
         FROM capture_sequences WHERE sequence_name = ?1",
        [sequence],
        |row| row.get(0),
    )
    .optional()?
    .with_context(|| format!("Sequence {} does not exist", sequence))
}

impl SequenceStore for SqliteStore {
    async fn sequence_catalog(&self) -> Result<Vec<CatalogEntry>> {
        let mut stmt = self
            .connection()
            .prepare(
                "SELECT sequence_name, table_name, column_name FROM capture_sequences \
                 ORDER BY sequence_name",
            )
            .context("Failed to read capture_sequences")?;
        let entries = stmt
            .query_map([], |row| {
                Ok(CatalogEntry {
                    schema: None,
                    sequence: row.get(0)?,
                    table: row.get(1)?,
                    column: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    async fn observed_max(&self, binding: &SequenceBinding) -> Result<i64> {
        let sql = format!(
            "SELECT COALESCE(MAX({}), 0) FROM {}",
            binding.quoted_column(),
            binding.quoted_table()
        );
        let max = self.connection().query_row(&sql, [], |row| row.get(0))?;
        Ok(max)
    }

    async fn peek_next(&self, binding: &SequenceBinding) -> Result<i64> {
        peek_value(self.connection(), &binding.sequence)
    }

    async fn draw_next(&self, binding: &SequenceBinding) -> Result<i64> {
        next_value(self.connection(), &binding.sequence)
    }

    async fn replicate_catch_up(
        &self,
        binding: &SequenceBinding,
        _replicate_function: &str,
    ) -> Result<()> {
        bail!(
            "cannot replicate catch-up of {}: SQLite databases are always single-node",
            binding
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SEQUENCE_DDL).unwrap();
        conn
    }

    #[test]
    fn test_nextval_semantics() {
        let conn = conn();
        let seq = register_sequence(&conn, "member_classes", "id").unwrap();
        assert_eq!(seq, "member_classes_id_seq");
        assert_eq!(peek_value(&conn, &seq).unwrap(), 1);
        assert_eq!(next_value(&conn, &seq).unwrap(), 1);
        assert_eq!(next_value(&conn, &seq).unwrap(), 2);
        assert_eq!(peek_value(&conn, &seq).unwrap(), 3);
    }

    #[test]
    fn test_register_is_idempotent() {
        let conn = conn();
        let seq = register_sequence(&conn, "t", "id").unwrap();
        next_value(&conn, &seq).unwrap();
        register_sequence(&conn, "t", "id").unwrap();
        assert_eq!(peek_value(&conn, &seq).unwrap(), 2);
    }

    #[test]
    fn test_owned_sequence_lookup() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(owned_sequence(&conn, "t", "id").unwrap(), None);

        conn.execute_batch(SEQUENCE_DDL).unwrap();
        register_sequence(&conn, "t", "id").unwrap();
        assert_eq!(
            owned_sequence(&conn, "t", "id").unwrap().as_deref(),
            Some("t_id_seq")
        );
        assert_eq!(owned_sequence(&conn, "u", "id").unwrap(), None);
    }

    #[test]
    fn test_unknown_sequence() {
        let conn = conn();
        assert!(next_value(&conn, "nope").is_err());
        assert!(peek_value(&conn, "nope").is_err());
    }
}
