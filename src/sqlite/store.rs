// ABOUTME: SQLite backend - connection-level reads and transactional row access
// ABOUTME: Identity columns draw from emulated sequences like a serial default

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::HashSet;
use std::path::Path;

use super::converter::{sqlite_value_to_text, text_to_sqlite_value};
use super::sequences::{next_value, owned_sequence};
use crate::capture::ledger::{AuditEntry, LedgerSink, NewAuditEntry};
use crate::capture::session::RowStore;
use crate::cluster::{ClusterNode, ClusterQuery};
use crate::node::TopologyProbe;
use crate::row::FieldMap;
use crate::utils::{quote_ident, validate_identifier};

const LEDGER_COLUMNS: &str = "operation, table_name, record_id, field_name, \
     old_value, new_value, user_name, \"timestamp\", ha_node_name";

/// A SQLite database file.
pub struct SqliteStore {
    conn: Connection,
    session_user: String,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. `session_user` is credited
    /// when a request carries no actor.
    pub fn open(path: impl AsRef<Path>, session_user: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        let journal_mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "wal", |row| row.get(0))
            .context("Failed to enable WAL")?;
        conn.pragma_update(None, "foreign_keys", "on")
            .context("Failed to enable foreign keys")?;
        tracing::debug!(
            "Opened SQLite database {} (journal mode {})",
            path.display(),
            journal_mode
        );
        Ok(Self {
            conn,
            session_user: session_user.into(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn session_user(&self) -> &str {
        &self.session_user
    }

    /// Start a write transaction for a capture session.
    ///
    /// The transaction takes the database write lock up front, which is what
    /// row locks amount to on SQLite.
    pub fn begin(&mut self) -> Result<SqliteTransaction<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;
        Ok(SqliteTransaction {
            tx,
            session_user: &self.session_user,
        })
    }

    /// Audit history of one record, oldest first.
    pub fn ledger_for_record(
        &self,
        ledger_table: &str,
        table: &str,
        record_id: i64,
    ) -> Result<Vec<AuditEntry>> {
        validate_identifier(ledger_table).context("Invalid ledger table name")?;
        let sql = format!(
            "SELECT id, {LEDGER_COLUMNS} FROM {} \
             WHERE table_name = ?1 AND record_id = ?2 ORDER BY id",
            quote_ident(ledger_table)
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Failed to read ledger {}", ledger_table))?;
        let mut rows = stmt.query(params![table, record_id])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(audit_entry_from_row(row)?);
        }
        Ok(entries)
    }

    pub fn cluster_status(&self, query: &ClusterQuery) -> Result<Vec<ClusterNode>> {
        let mut stmt = self
            .conn
            .prepare(query.sql())
            .context("Failed to prepare cluster status query")?;
        let nodes = stmt
            .query_map(params![query.address_key(), query.artifact_kind()], |row| {
                Ok(ClusterNode {
                    node_name: row.get(0)?,
                    address: row.get(1)?,
                    last_distributed_at: row.get(2)?,
                })
            })
            .context("Failed to query cluster status")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read cluster status rows")?;
        Ok(nodes)
    }
}

/// SQLite has no multi-master replication extension.
impl TopologyProbe for SqliteStore {
    async fn has_extension(&self, _extension: &str) -> Result<bool> {
        Ok(false)
    }

    async fn local_node_name(&self, _function: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Columns of `table` declared as BLOB.
fn blob_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM pragma_table_info(?1) WHERE upper(type) = 'BLOB'",
    )?;
    let columns = stmt
        .query_map([table], |row| row.get(0))
        .with_context(|| format!("Failed to read column types of {}", table))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(columns)
}

fn audit_entry_from_row(row: &Row<'_>) -> Result<AuditEntry> {
    let operation: String = row.get("operation")?;
    let actor: Option<String> = row.get("user_name")?;
    let occurred_at: DateTime<Utc> = row.get("timestamp")?;
    Ok(AuditEntry {
        id: row.get("id")?,
        operation: operation.parse()?,
        entity_table: row.get("table_name")?,
        record_id: row.get("record_id")?,
        field_name: row.get("field_name")?,
        old_value: row.get("old_value")?,
        new_value: row.get("new_value")?,
        actor: actor.unwrap_or_default(),
        occurred_at,
        node_name: row.get("ha_node_name")?,
    })
}

/// One open SQLite transaction. Dropping it without commit rolls back.
pub struct SqliteTransaction<'a> {
    tx: Transaction<'a>,
    session_user: &'a str,
}

impl LedgerSink for SqliteTransaction<'_> {
    async fn append(&mut self, ledger_table: &str, entry: &NewAuditEntry) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {} ({LEDGER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            quote_ident(ledger_table)
        );
        self.tx
            .execute(
                &sql,
                params![
                    entry.operation.as_str(),
                    entry.entity_table,
                    entry.record_id,
                    entry.field_name,
                    entry.old_value,
                    entry.new_value,
                    entry.actor,
                    entry.occurred_at,
                    entry.node_name,
                ],
            )
            .with_context(|| format!("Failed to append to ledger {}", ledger_table))?;
        Ok(self.tx.last_insert_rowid())
    }
}

impl RowStore for SqliteTransaction<'_> {
    fn session_identity(&self) -> &str {
        self.session_user
    }

    async fn fetch_row(&mut self, table: &str, id: i64, _lock: bool) -> Result<Option<FieldMap>> {
        let sql = format!("SELECT * FROM {} WHERE \"id\" = ?1", quote_ident(table));
        let mut stmt = self
            .tx
            .prepare(&sql)
            .with_context(|| format!("Failed to read {} id {}", table, id))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let image = stmt
            .query_row([id], |row| {
                let mut fields = FieldMap::new();
                for (i, name) in columns.iter().enumerate() {
                    fields.insert_raw(name.clone(), sqlite_value_to_text(row.get_ref(i)?));
                }
                Ok(fields)
            })
            .optional()
            .with_context(|| format!("Failed to read {} id {}", table, id))?;
        Ok(image)
    }

    async fn select_ids(
        &mut self,
        table: &str,
        column: &str,
        value: Option<&str>,
        _lock: bool,
    ) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT \"id\" FROM {} WHERE {} IS ?1 ORDER BY \"id\"",
            quote_ident(table),
            quote_ident(column)
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let ids = stmt
            .query_map([value], |row| row.get(0))
            .with_context(|| format!("Failed to select rows of {} by {}", table, column))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    async fn insert_row(&mut self, table: &str, fields: &FieldMap) -> Result<i64> {
        let mut fields = fields.clone();
        if !fields.contains("id") {
            if let Some(sequence) = owned_sequence(&self.tx, table, "id")? {
                let id = next_value(&self.tx, &sequence)?;
                fields.set("id", id);
            }
        }

        let target = quote_ident(table);
        if fields.is_empty() {
            self.tx
                .execute(&format!("INSERT INTO {} DEFAULT VALUES", target), [])?;
            return Ok(self.tx.last_insert_rowid());
        }

        let columns: Vec<String> = fields.names().map(quote_ident).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            target,
            columns.join(", "),
            placeholders.join(", ")
        );
        let blobs = blob_columns(&self.tx, table)?;
        self.tx.execute(
            &sql,
            params_from_iter(
                fields
                    .iter()
                    .map(|(name, v)| text_to_sqlite_value(v, blobs.contains(name))),
            ),
        )?;

        match fields.value("id") {
            Some(_) => fields.parse("id"),
            None => Ok(self.tx.last_insert_rowid()),
        }
    }

    async fn update_row(&mut self, table: &str, id: i64, changes: &FieldMap) -> Result<u64> {
        let assignments: Vec<String> = changes
            .names()
            .enumerate()
            .map(|(i, name)| format!("{} = ?{}", quote_ident(name), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE \"id\" = ?{}",
            quote_ident(table),
            assignments.join(", "),
            assignments.len() + 1
        );
        let blobs = blob_columns(&self.tx, table)?;
        let mut values: Vec<Value> = changes
            .iter()
            .map(|(name, v)| text_to_sqlite_value(v, blobs.contains(name)))
            .collect();
        values.push(Value::Integer(id));
        let updated = self.tx.execute(&sql, params_from_iter(values))?;
        Ok(updated as u64)
    }

    async fn delete_row(&mut self, table: &str, id: i64) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE \"id\" = ?1", quote_ident(table));
        let deleted = self.tx.execute(&sql, [id])?;
        Ok(deleted as u64)
    }

    async fn truncate_table(&mut self, table: &str) -> Result<()> {
        self.tx
            .execute(&format!("DELETE FROM {}", quote_ident(table)), [])?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().context("Failed to commit transaction")
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().context("Failed to roll back transaction")
    }
}
