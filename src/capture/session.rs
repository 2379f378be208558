// ABOUTME: CaptureSession - the write API CRUD collaborators use inside one transaction
// ABOUTME: Wires tagging, row images, the change interceptor and the ledger around each write

use anyhow::{bail, Context, Result};
use chrono::Utc;

use super::error::CaptureError;
use super::interceptor::{RowImage, WriteKind};
use super::ledger::LedgerSink;
use super::CaptureLayer;
use crate::context::RequestContext;
use crate::entities::TrackedEntity;
use crate::row::FieldMap;
use crate::utils::validate_identifier;

/// Row access inside one open backend transaction.
///
/// Row images are returned in the database's own text rendering so that the
/// before and after images of a write always compare like for like.
#[allow(async_fn_in_trait)]
pub trait RowStore: LedgerSink {
    /// Identity credited when the request carries no actor.
    fn session_identity(&self) -> &str;

    /// Current image of row `id`, optionally locked for update.
    async fn fetch_row(&mut self, table: &str, id: i64, lock: bool) -> Result<Option<FieldMap>>;

    /// Ids of rows where `column` equals `value` (NULL-safe), optionally locked.
    async fn select_ids(
        &mut self,
        table: &str,
        column: &str,
        value: Option<&str>,
        lock: bool,
    ) -> Result<Vec<i64>>;

    /// Insert a row and return its id.
    async fn insert_row(&mut self, table: &str, fields: &FieldMap) -> Result<i64>;

    async fn update_row(&mut self, table: &str, id: i64, changes: &FieldMap) -> Result<u64>;

    async fn delete_row(&mut self, table: &str, id: i64) -> Result<u64>;

    async fn truncate_table(&mut self, table: &str) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// One request's writes, bound to an open transaction.
///
/// Dropping the session without [`CaptureSession::commit`] rolls the
/// transaction back, audit entries included. Once an audit write has failed
/// the session can no longer commit.
pub struct CaptureSession<'l, S: RowStore> {
    layer: &'l CaptureLayer,
    store: S,
    context: RequestContext,
    actor: String,
    audit_failed: bool,
}

impl<'l, S: RowStore> CaptureSession<'l, S> {
    pub(super) fn new(layer: &'l CaptureLayer, store: S, context: RequestContext) -> Self {
        let actor = context.resolve_actor(store.session_identity());
        Self {
            layer,
            store,
            context,
            actor,
            audit_failed: false,
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Direct access to the underlying transaction, for reads.
    pub fn store(&mut self) -> &mut S {
        &mut self.store
    }

    /// Insert a row, returning its id.
    pub async fn insert(&mut self, table: &str, mut fields: FieldMap) -> Result<i64> {
        self.check_write_target(table, &fields)?;
        let registry = &self.layer.registry;

        if registry.is_partitioned(table) {
            self.layer
                .tagger
                .stamp(&mut fields, self.context.topology());
        }

        let id = self
            .store
            .insert_row(table, &fields)
            .await
            .with_context(|| format!("Failed to insert into {}", table))?;

        if registry.is_tracked(table) {
            let after = self.store.fetch_row(table, id, false).await?;
            let image = RowImage {
                kind: WriteKind::Insert,
                record_id: id,
                before: None,
                after,
            };
            self.capture(table, &image).await?;
        }

        Ok(id)
    }

    /// Update row `id` with `changes`. Returns `false` when the row does not
    /// exist.
    pub async fn update(&mut self, table: &str, id: i64, changes: FieldMap) -> Result<bool> {
        self.check_write_target(table, &changes)?;
        if changes.contains("id") {
            bail!("The id of {} row {} cannot be updated", table, id);
        }

        let Some(before) = self.store.fetch_row(table, id, true).await? else {
            return Ok(false);
        };

        if self.layer.registry.is_partitioned(table) {
            self.layer
                .tagger
                .guard_update(table, id, &before, &changes)?;
        }

        if changes.is_empty() {
            return Ok(true);
        }

        self.store
            .update_row(table, id, &changes)
            .await
            .with_context(|| format!("Failed to update {} id {}", table, id))?;

        if self.layer.registry.is_tracked(table) {
            let after = self.store.fetch_row(table, id, false).await?;
            let image = RowImage {
                kind: WriteKind::Update,
                record_id: id,
                before: Some(before),
                after,
            };
            self.capture(table, &image).await?;
        }

        Ok(true)
    }

    /// Delete row `id`. Returns `false` when the row does not exist.
    pub async fn delete(&mut self, table: &str, id: i64) -> Result<bool> {
        self.check_write_target(table, &FieldMap::new())?;

        let Some(before) = self.store.fetch_row(table, id, true).await? else {
            return Ok(false);
        };

        self.store
            .delete_row(table, id)
            .await
            .with_context(|| format!("Failed to delete {} id {}", table, id))?;

        if self.layer.registry.is_tracked(table) {
            self.capture(table, &RowImage::deleted(id, before)).await?;
        }

        Ok(true)
    }

    /// Multi-row update: every row where `column` equals `value` gets
    /// `changes`, each captured on its own. Returns the number of rows updated.
    pub async fn update_where(
        &mut self,
        table: &str,
        column: &str,
        value: Option<&str>,
        changes: FieldMap,
    ) -> Result<u64> {
        self.check_write_target(table, &changes)?;
        validate_identifier(column).context("Invalid filter column")?;

        let ids = self.store.select_ids(table, column, value, true).await?;
        let mut updated = 0;
        for id in ids {
            if self.update(table, id, changes.clone()).await? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Multi-row delete, captured per row. Returns the number of rows deleted.
    pub async fn delete_where(
        &mut self,
        table: &str,
        column: &str,
        value: Option<&str>,
    ) -> Result<u64> {
        self.check_write_target(table, &FieldMap::new())?;
        validate_identifier(column).context("Invalid filter column")?;

        let ids = self.store.select_ids(table, column, value, true).await?;
        let mut deleted = 0;
        for id in ids {
            if self.delete(table, id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Remove every row of an untracked table.
    ///
    /// A tracked table cannot be truncated: the interceptor has no per-row
    /// images for it and fails the statement.
    pub async fn truncate(&mut self, table: &str) -> Result<()> {
        self.check_write_target(table, &FieldMap::new())?;

        if self.layer.registry.is_tracked(table) {
            let image = RowImage {
                kind: WriteKind::Truncate,
                record_id: 0,
                before: None,
                after: None,
            };
            self.capture(table, &image).await?;
        }

        self.store
            .truncate_table(table)
            .await
            .with_context(|| format!("Failed to truncate {}", table))
    }

    pub async fn insert_entity<E: TrackedEntity>(&mut self, entity: &E) -> Result<i64> {
        let fields = entity.to_fields(self.layer.tagger.column());
        self.insert(E::TABLE, fields).await
    }

    pub async fn update_entity<E: TrackedEntity>(&mut self, entity: &E) -> Result<bool> {
        let id = entity
            .id()
            .with_context(|| format!("Cannot update an unsaved {} row", E::TABLE))?;
        let mut changes = entity.to_fields(self.layer.tagger.column());
        changes.remove("id");
        self.update(E::TABLE, id, changes).await
    }

    pub async fn delete_entity<E: TrackedEntity>(&mut self, entity: &E) -> Result<bool> {
        let id = entity
            .id()
            .with_context(|| format!("Cannot delete an unsaved {} row", E::TABLE))?;
        self.delete(E::TABLE, id).await
    }

    pub async fn load_entity<E: TrackedEntity>(&mut self, id: i64) -> Result<Option<E>> {
        match self.store.fetch_row(E::TABLE, id, false).await? {
            Some(fields) => E::from_fields(&fields, self.layer.tagger.column()).map(Some),
            None => Ok(None),
        }
    }

    /// Commit the transaction. Rolls back instead, and fails, when any audit
    /// write of this session failed.
    pub async fn commit(self) -> Result<()> {
        if self.audit_failed {
            self.store.rollback().await?;
            bail!("Transaction rolled back: an audit entry could not be written");
        }
        self.store.commit().await
    }

    pub async fn rollback(self) -> Result<()> {
        self.store.rollback().await
    }

    fn check_write_target(&self, table: &str, fields: &FieldMap) -> Result<()> {
        validate_identifier(table).context("Invalid table name")?;
        if self.layer.registry.is_ledger(table) {
            return Err(CaptureError::LedgerWriteRefused(table.to_string()).into());
        }
        for name in fields.names() {
            validate_identifier(name)
                .with_context(|| format!("Invalid column name for table '{}'", table))?;
        }
        Ok(())
    }

    async fn capture(&mut self, table: &str, image: &RowImage) -> Result<usize> {
        let written = self
            .layer
            .interceptor
            .after_row(
                &mut self.store,
                table,
                image,
                self.layer.registry.is_partitioned(table),
                &self.actor,
                Utc::now(),
            )
            .await;
        // A refused statement wrote nothing. Any other failure leaves a row
        // change without its audit entries.
        if let Err(e) = &written {
            if !matches!(
                e.downcast_ref::<CaptureError>(),
                Some(CaptureError::UnsupportedOperation { .. })
            ) {
                self.audit_failed = true;
            }
        }
        written
    }
}
