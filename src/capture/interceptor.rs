// ABOUTME: Change interceptor - the after-row hook run for every tracked write
// ABOUTME: Feeds row images through the differ into the audit writer

use anyhow::Result;
use std::fmt;

use super::diff::diff;
use super::error::CaptureError;
use super::hook::HookSpec;
use super::ledger::{Attribution, AuditWriter, LedgerSink, Operation};
use crate::row::FieldMap;

/// Kind of row write observed by the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
    Truncate,
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteKind::Insert => "INSERT",
            WriteKind::Update => "UPDATE",
            WriteKind::Delete => "DELETE",
            WriteKind::Truncate => "TRUNCATE",
        };
        f.write_str(name)
    }
}

/// The before/after images of one affected row.
#[derive(Debug, Clone)]
pub struct RowImage {
    pub kind: WriteKind,
    pub record_id: i64,
    pub before: Option<FieldMap>,
    pub after: Option<FieldMap>,
}

impl RowImage {
    pub fn inserted(record_id: i64, after: FieldMap) -> Self {
        Self {
            kind: WriteKind::Insert,
            record_id,
            before: None,
            after: Some(after),
        }
    }

    pub fn updated(record_id: i64, before: FieldMap, after: FieldMap) -> Self {
        Self {
            kind: WriteKind::Update,
            record_id,
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn deleted(record_id: i64, before: FieldMap) -> Self {
        Self {
            kind: WriteKind::Delete,
            record_id,
            before: Some(before),
            after: None,
        }
    }

    fn require_before(&self, table: &str) -> Result<&FieldMap, CaptureError> {
        self.before
            .as_ref()
            .ok_or_else(|| self.missing(table, "before"))
    }

    fn require_after(&self, table: &str) -> Result<&FieldMap, CaptureError> {
        self.after.as_ref().ok_or_else(|| self.missing(table, "after"))
    }

    fn missing(&self, table: &str, image: &'static str) -> CaptureError {
        CaptureError::MissingRowImage {
            table: table.to_string(),
            record_id: self.record_id,
            kind: self.kind,
            image,
        }
    }
}

/// Runs once per affected row of a tracked table, after the write is visible
/// inside the transaction and before commit.
#[derive(Debug, Clone)]
pub struct ChangeInterceptor {
    writer: AuditWriter,
    node_column: String,
}

impl ChangeInterceptor {
    pub fn new(writer: AuditWriter, node_column: impl Into<String>) -> Self {
        Self {
            writer,
            node_column: node_column.into(),
        }
    }

    pub fn writer(&self) -> &AuditWriter {
        &self.writer
    }

    /// Only an AFTER ROW registration gives the interceptor a stable snapshot
    /// of both images.
    pub fn validate_registration(table: &str, spec: HookSpec) -> Result<(), CaptureError> {
        if spec != HookSpec::AFTER_ROW {
            return Err(CaptureError::InvalidHook {
                component: "change capture",
                table: table.to_string(),
                expected: HookSpec::AFTER_ROW,
                actual: spec,
            });
        }
        Ok(())
    }

    /// Diff `image` and append one ledger entry per changed field.
    ///
    /// `node_partitioned` controls whether entries carry the owning node's
    /// name, taken from the row image itself. Returns the number of entries
    /// written.
    pub async fn after_row<L: LedgerSink>(
        &self,
        sink: &mut L,
        table: &str,
        image: &RowImage,
        node_partitioned: bool,
        actor: &str,
        occurred_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<usize> {
        let (operation, changes, owner_image) = match image.kind {
            WriteKind::Insert => {
                let after = image.require_after(table)?;
                (Operation::Insert, diff(None, Some(after)), after)
            }
            WriteKind::Update => {
                let before = image.require_before(table)?;
                let after = image.require_after(table)?;
                let changes = diff(Some(before), Some(after));
                if changes.is_empty() {
                    tracing::debug!(
                        "No field changes on {} id {}, nothing to audit",
                        table,
                        image.record_id
                    );
                    return Ok(0);
                }
                (Operation::Update, changes, after)
            }
            WriteKind::Delete => {
                let before = image.require_before(table)?;
                (Operation::Delete, diff(Some(before), None), before)
            }
            kind => {
                return Err(CaptureError::UnsupportedOperation {
                    table: table.to_string(),
                    kind,
                }
                .into())
            }
        };

        let node_name = if node_partitioned {
            owner_image.value(&self.node_column)
        } else {
            None
        };

        let attribution = Attribution {
            actor,
            occurred_at,
            node_name,
        };

        let written = self
            .writer
            .write(
                sink,
                operation,
                table,
                image.record_id,
                &changes,
                &attribution,
            )
            .await?;

        tracing::debug!(
            "Captured {} on {} id {}: {} field(s)",
            operation,
            table,
            image.record_id,
            written
        );

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::hook::{HookGranularity, HookTiming};
    use crate::capture::ledger::NewAuditEntry;
    use chrono::Utc;

    #[derive(Default)]
    struct MemorySink {
        rows: Vec<NewAuditEntry>,
    }

    impl LedgerSink for MemorySink {
        async fn append(&mut self, _ledger_table: &str, entry: &NewAuditEntry) -> Result<i64> {
            self.rows.push(entry.clone());
            Ok(self.rows.len() as i64)
        }
    }

    fn interceptor() -> ChangeInterceptor {
        ChangeInterceptor::new(AuditWriter::new("history"), "ha_node_name")
    }

    fn parameter(value: &str) -> FieldMap {
        FieldMap::new()
            .with("id", 1i64)
            .with("key", "centralServerAddress")
            .with("value", value)
            .with("ha_node_name", "node_0")
    }

    #[test]
    fn test_registration_requires_after_row() {
        assert!(ChangeInterceptor::validate_registration("t", HookSpec::AFTER_ROW).is_ok());

        let err = ChangeInterceptor::validate_registration("t", HookSpec::BEFORE_ROW).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidHook { .. }));

        let statement = HookSpec::new(HookTiming::After, HookGranularity::Statement);
        assert!(ChangeInterceptor::validate_registration("t", statement).is_err());
    }

    #[tokio::test]
    async fn test_update_example_single_entry() {
        let mut sink = MemorySink::default();
        let image = RowImage::updated(1, parameter("10.0.0.1"), parameter("10.0.0.2"));
        let written = interceptor()
            .after_row(
                &mut sink,
                "system_parameters",
                &image,
                true,
                "admin",
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(written, 1);
        let entry = &sink.rows[0];
        assert_eq!(entry.operation, Operation::Update);
        assert_eq!(entry.field_name, "value");
        assert_eq!(entry.old_value.as_deref(), Some("10.0.0.1"));
        assert_eq!(entry.new_value.as_deref(), Some("10.0.0.2"));
        assert_eq!(entry.node_name.as_deref(), Some("node_0"));
    }

    #[tokio::test]
    async fn test_noop_update_writes_nothing() {
        let mut sink = MemorySink::default();
        let image = RowImage::updated(1, parameter("10.0.0.1"), parameter("10.0.0.1"));
        let written = interceptor()
            .after_row(&mut sink, "system_parameters", &image, true, "admin", Utc::now())
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert!(sink.rows.is_empty());
    }

    #[tokio::test]
    async fn test_untagged_table_entries_have_no_node() {
        let mut sink = MemorySink::default();
        let image = RowImage::inserted(1, parameter("10.0.0.1"));
        interceptor()
            .after_row(&mut sink, "member_classes", &image, false, "admin", Utc::now())
            .await
            .unwrap();
        assert_eq!(sink.rows.len(), 4);
        assert!(sink.rows.iter().all(|e| e.node_name.is_none()));
    }

    #[tokio::test]
    async fn test_truncate_is_unsupported() {
        let mut sink = MemorySink::default();
        let image = RowImage {
            kind: WriteKind::Truncate,
            record_id: 0,
            before: None,
            after: None,
        };
        let err = interceptor()
            .after_row(&mut sink, "member_classes", &image, false, "admin", Utc::now())
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CaptureError>(),
            Some(&CaptureError::UnsupportedOperation {
                table: "member_classes".to_string(),
                kind: WriteKind::Truncate,
            })
        );
        assert!(sink.rows.is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_is_fatal() {
        let mut sink = MemorySink::default();
        let image = RowImage {
            kind: WriteKind::Update,
            record_id: 3,
            before: None,
            after: Some(parameter("x")),
        };
        let err = interceptor()
            .after_row(&mut sink, "system_parameters", &image, true, "admin", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CaptureError>(),
            Some(CaptureError::MissingRowImage { image: "before", .. })
        ));
    }
}
