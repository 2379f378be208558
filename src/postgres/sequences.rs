// ABOUTME: PostgreSQL sequence access for the reconciler
// ABOUTME: Catalog discovery via pg_depend, peek via pg_sequence, replication via the extension

use anyhow::{Context, Result};

use super::store::PgStore;
use crate::sequence::{CatalogEntry, SequenceBinding, SequenceStore};
use crate::utils::validate_qualified_name;

/// Sequences owned by a column (serial / identity), in one schema. The table
/// and column sides are outer-joined so that a damaged dependency still shows
/// up as an entry the reconciler can report.
const CATALOG_QUERY: &str = "\
    SELECT ns.nspname::text, s.relname::text, t.relname::text, a.attname::text \
    FROM pg_class s \
    JOIN pg_namespace ns ON ns.oid = s.relnamespace \
    JOIN pg_depend d ON d.objid = s.oid \
         AND d.classid = 'pg_class'::regclass \
         AND d.refclassid = 'pg_class'::regclass \
         AND d.deptype IN ('a', 'i') \
    LEFT JOIN pg_class t ON t.oid = d.refobjid \
    LEFT JOIN pg_attribute a ON a.attrelid = d.refobjid AND a.attnum = d.refobjsubid \
    WHERE s.relkind = 'S' AND ns.nspname = $1 \
    ORDER BY s.relname";

impl SequenceStore for PgStore {
    async fn sequence_catalog(&self) -> Result<Vec<CatalogEntry>> {
        let rows = self
            .client()
            .query(CATALOG_QUERY, &[&self.schema()])
            .await
            .with_context(|| format!("Failed to list sequences in schema '{}'", self.schema()))?;
        Ok(rows
            .iter()
            .map(|row| CatalogEntry {
                schema: row.get(0),
                sequence: row.get(1),
                table: row.get(2),
                column: row.get(3),
            })
            .collect())
    }

    async fn observed_max(&self, binding: &SequenceBinding) -> Result<i64> {
        let sql = format!(
            "SELECT COALESCE(MAX({}), 0)::bigint FROM {}",
            binding.quoted_column(),
            binding.quoted_table()
        );
        let row = self.client().query_one(&sql, &[]).await?;
        Ok(row.get(0))
    }

    async fn peek_next(&self, binding: &SequenceBinding) -> Result<i64> {
        let sql = format!(
            "SELECT CASE WHEN s.is_called THEN s.last_value + p.seqincrement ELSE s.last_value END \
             FROM {} s, pg_catalog.pg_sequence p \
             WHERE p.seqrelid = $1::text::regclass",
            binding.quoted_sequence()
        );
        let row = self
            .client()
            .query_one(&sql, &[&binding.quoted_sequence()])
            .await?;
        Ok(row.get(0))
    }

    async fn draw_next(&self, binding: &SequenceBinding) -> Result<i64> {
        let row = self
            .client()
            .query_one("SELECT nextval($1::text::regclass)", &[&binding.quoted_sequence()])
            .await?;
        Ok(row.get(0))
    }

    async fn replicate_catch_up(
        &self,
        binding: &SequenceBinding,
        replicate_function: &str,
    ) -> Result<()> {
        validate_qualified_name(replicate_function)?;
        let sql = format!("SELECT {}($1)", replicate_function);
        self.client()
            .execute(&sql, &[&binding.catch_up_block()])
            .await?;
        Ok(())
    }
}
