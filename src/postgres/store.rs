// ABOUTME: PostgreSQL backend - connection-level reads and transactional row access
// ABOUTME: Row images come from row_to_json so both sides of a diff share one rendering

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio_postgres::{Client, Row, Transaction};

use super::connection::connect_with_retry;
use crate::capture::ledger::{AuditEntry, LedgerSink, NewAuditEntry};
use crate::capture::session::RowStore;
use crate::cluster::{ClusterNode, ClusterQuery};
use crate::node::TopologyProbe;
use crate::row::FieldMap;
use crate::utils::{quote_ident, quote_qualified, sanitize_url, validate_identifier, validate_qualified_name};

/// Ledger columns in insert order.
pub(crate) const LEDGER_COLUMNS: &str = "operation, table_name, record_id, field_name, \
     old_value, new_value, user_name, \"timestamp\", ha_node_name";

/// A PostgreSQL connection bound to one schema.
pub struct PgStore {
    client: Client,
    schema: String,
    session_user: String,
}

impl PgStore {
    pub async fn connect(url: &str, schema: &str) -> Result<Self> {
        validate_identifier(schema).context("Invalid schema name")?;
        let client = connect_with_retry(url).await?;
        let row = client
            .query_one("SELECT session_user::text", &[])
            .await
            .context("Failed to read session user")?;
        let session_user: String = row.get(0);
        tracing::info!(
            "Connected to {} as '{}'",
            sanitize_url(url),
            session_user
        );
        Ok(Self {
            client,
            schema: schema.to_string(),
            session_user,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn session_user(&self) -> &str {
        &self.session_user
    }

    /// Start a transaction for a capture session.
    pub async fn begin(&mut self) -> Result<PgTransaction<'_>> {
        let tx = self
            .client
            .transaction()
            .await
            .context("Failed to begin transaction")?;
        Ok(PgTransaction {
            tx,
            schema: &self.schema,
            session_user: &self.session_user,
        })
    }

    pub(crate) fn qualified(&self, name: &str) -> String {
        quote_qualified(Some(&self.schema), name)
    }

    /// Audit history of one record, oldest first.
    pub async fn ledger_for_record(
        &self,
        ledger_table: &str,
        table: &str,
        record_id: i64,
    ) -> Result<Vec<AuditEntry>> {
        validate_identifier(ledger_table).context("Invalid ledger table name")?;
        let sql = format!(
            "SELECT id, {LEDGER_COLUMNS} FROM {} \
             WHERE table_name = $1 AND record_id = $2 ORDER BY id",
            self.qualified(ledger_table)
        );
        let rows = self
            .client
            .query(&sql, &[&table, &record_id])
            .await
            .with_context(|| format!("Failed to read ledger for {} id {}", table, record_id))?;
        rows.iter().map(audit_entry_from_row).collect()
    }

    pub async fn cluster_status(&self, query: &ClusterQuery) -> Result<Vec<ClusterNode>> {
        let rows = self
            .client
            .query(query.sql(), &[&query.address_key(), &query.artifact_kind()])
            .await
            .context("Failed to query cluster status")?;
        Ok(rows
            .iter()
            .map(|row| ClusterNode {
                node_name: row.get(0),
                address: row.get(1),
                last_distributed_at: row.get(2),
            })
            .collect())
    }
}

impl TopologyProbe for PgStore {
    async fn has_extension(&self, extension: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = $1)",
                &[&extension],
            )
            .await
            .context("Failed to query pg_extension")?;
        Ok(row.get(0))
    }

    async fn local_node_name(&self, function: &str) -> Result<Option<String>> {
        validate_qualified_name(function)?;
        let row = self
            .client
            .query_one(&format!("SELECT {}()::text", function), &[])
            .await
            .with_context(|| format!("Failed to call {}()", function))?;
        Ok(row.get(0))
    }
}

fn audit_entry_from_row(row: &Row) -> Result<AuditEntry> {
    let operation: String = row.get("operation");
    let occurred_at: DateTime<Utc> = row.get("timestamp");
    let actor: Option<String> = row.get("user_name");
    Ok(AuditEntry {
        id: row.get("id"),
        operation: operation.parse()?,
        entity_table: row.get("table_name"),
        record_id: row.get("record_id"),
        field_name: row.get("field_name"),
        old_value: row.get("old_value"),
        new_value: row.get("new_value"),
        actor: actor.unwrap_or_default(),
        occurred_at,
        node_name: row.get("ha_node_name"),
    })
}

/// One open transaction: the unit a capture session writes through.
///
/// Dropping it without commit rolls back.
pub struct PgTransaction<'a> {
    tx: Transaction<'a>,
    schema: &'a str,
    session_user: &'a str,
}

impl PgTransaction<'_> {
    fn qualified(&self, table: &str) -> String {
        quote_qualified(Some(self.schema), table)
    }
}

fn json_record(fields: &FieldMap) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .map(|(name, value)| {
            let value = value
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null);
            (name.to_string(), value)
        })
        .collect();
    Value::Object(map)
}

fn quoted_columns(fields: &FieldMap) -> String {
    fields.names().map(quote_ident).collect::<Vec<_>>().join(", ")
}

impl LedgerSink for PgTransaction<'_> {
    async fn append(&mut self, ledger_table: &str, entry: &NewAuditEntry) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {} ({LEDGER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING id",
            self.qualified(ledger_table)
        );
        let row = self
            .tx
            .query_one(
                &sql,
                &[
                    &entry.operation.as_str(),
                    &entry.entity_table,
                    &entry.record_id,
                    &entry.field_name,
                    &entry.old_value,
                    &entry.new_value,
                    &entry.actor,
                    &entry.occurred_at,
                    &entry.node_name,
                ],
            )
            .await
            .with_context(|| format!("Failed to append to ledger {}", ledger_table))?;
        Ok(row.get(0))
    }
}

impl RowStore for PgTransaction<'_> {
    fn session_identity(&self) -> &str {
        self.session_user
    }

    async fn fetch_row(&mut self, table: &str, id: i64, lock: bool) -> Result<Option<FieldMap>> {
        let sql = format!(
            "SELECT j.key, j.value FROM {} t, LATERAL json_each_text(row_to_json(t)) j \
             WHERE t.\"id\" = $1::bigint{}",
            self.qualified(table),
            if lock { " FOR UPDATE OF t" } else { "" }
        );
        let rows = self
            .tx
            .query(&sql, &[&id])
            .await
            .with_context(|| format!("Failed to read {} id {}", table, id))?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            rows.iter()
                .map(|row| (row.get::<_, String>(0), row.get::<_, Option<String>>(1)))
                .collect(),
        ))
    }

    async fn select_ids(
        &mut self,
        table: &str,
        column: &str,
        value: Option<&str>,
        lock: bool,
    ) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT t.\"id\"::bigint FROM {} t WHERE t.{}::text IS NOT DISTINCT FROM $1::text \
             ORDER BY t.\"id\"{}",
            self.qualified(table),
            quote_ident(column),
            if lock { " FOR UPDATE OF t" } else { "" }
        );
        let rows = self
            .tx
            .query(&sql, &[&value])
            .await
            .with_context(|| format!("Failed to select rows of {} by {}", table, column))?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn insert_row(&mut self, table: &str, fields: &FieldMap) -> Result<i64> {
        let target = self.qualified(table);
        let row = if fields.is_empty() {
            let sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING \"id\"::bigint", target);
            self.tx.query_one(&sql, &[]).await?
        } else {
            let columns = quoted_columns(fields);
            let sql = format!(
                "INSERT INTO {target} ({columns}) \
                 SELECT {columns} FROM json_populate_record(NULL::{target}, $1::json) \
                 RETURNING \"id\"::bigint"
            );
            self.tx.query_one(&sql, &[&json_record(fields)]).await?
        };
        Ok(row.get(0))
    }

    async fn update_row(&mut self, table: &str, id: i64, changes: &FieldMap) -> Result<u64> {
        let target = self.qualified(table);
        let assignments = changes
            .names()
            .map(|name| format!("{0} = r.{0}", quote_ident(name)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {target} AS t SET {assignments} \
             FROM json_populate_record(NULL::{target}, $1::json) AS r \
             WHERE t.\"id\" = $2::bigint"
        );
        Ok(self.tx.execute(&sql, &[&json_record(changes), &id]).await?)
    }

    async fn delete_row(&mut self, table: &str, id: i64) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE \"id\" = $1::bigint",
            self.qualified(table)
        );
        Ok(self.tx.execute(&sql, &[&id]).await?)
    }

    async fn truncate_table(&mut self, table: &str) -> Result<()> {
        let sql = format!("TRUNCATE {}", self.qualified(table));
        self.tx.batch_execute(&sql).await?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back transaction")
    }
}
