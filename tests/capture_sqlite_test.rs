// ABOUTME: End-to-end change capture against a SQLite database file
// ABOUTME: Covers ledger contents per write kind, node tagging and transaction coupling

use std::sync::Arc;

use change_ledger::capture::{AuditEntry, CaptureError, CaptureLayer, CaptureRegistry, Operation};
use change_ledger::config::CaptureConfig;
use change_ledger::entities::{MemberClass, SystemParameter};
use change_ledger::node::{NodeTagger, Topology, TopologyDetector};
use change_ledger::row::FieldMap;
use change_ledger::sqlite::{self, SqliteStore};
use tempfile::TempDir;

fn open_store() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("ledger.db"), "sqlite").unwrap();
    sqlite::install_schema(&store, &CaptureConfig::default()).unwrap();
    store
        .connection()
        .execute_batch(
            "CREATE TABLE prices (id INTEGER PRIMARY KEY, amount REAL, quantity INTEGER);
             CREATE TABLE scratch (id INTEGER PRIMARY KEY, note TEXT);",
        )
        .unwrap();
    (dir, store)
}

fn layer_with(topology: Topology) -> CaptureLayer {
    let registry = CaptureRegistry::builder("history")
        .track("member_classes")
        .track("system_parameters")
        .track("prices")
        .partition("system_parameters")
        .build()
        .unwrap();
    CaptureLayer::new(
        registry,
        NodeTagger::default(),
        Arc::new(TopologyDetector::new(topology)),
    )
}

fn layer() -> CaptureLayer {
    layer_with(Topology::SingleNode)
}

fn history(store: &SqliteStore, table: &str, id: i64) -> Vec<AuditEntry> {
    store.ledger_for_record("history", table, id).unwrap()
}

fn ledger_size(store: &SqliteStore) -> i64 {
    store
        .connection()
        .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))
        .unwrap()
}

fn entry<'a>(entries: &'a [AuditEntry], operation: Operation, field: &str) -> &'a AuditEntry {
    entries
        .iter()
        .find(|e| e.operation == operation && e.field_name == field)
        .unwrap_or_else(|| panic!("no {} entry for {}", operation, field))
}

#[tokio::test]
async fn test_insert_records_every_field() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert(
            "member_classes",
            FieldMap::new().with("code", "GOV").with("description", "Government"),
        )
        .await
        .unwrap();
    session.commit().await.unwrap();

    let entries = history(&store, "member_classes", id);
    assert_eq!(entries.len(), 3);
    for e in &entries {
        assert_eq!(e.operation, Operation::Insert);
        assert_eq!(e.old_value, None);
        assert_eq!(e.actor, "alice");
        assert_eq!(e.node_name, None);
        assert_eq!(e.record_id, id);
    }
    assert_eq!(
        entry(&entries, Operation::Insert, "code").new_value.as_deref(),
        Some("GOV")
    );
    assert_eq!(
        entry(&entries, Operation::Insert, "id").new_value,
        Some(id.to_string())
    );
}

#[tokio::test]
async fn test_insert_records_null_fields() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert(
            "member_classes",
            FieldMap::new().with("code", "COM").with("description", None::<String>),
        )
        .await
        .unwrap();
    session.commit().await.unwrap();

    let entries = history(&store, "member_classes", id);
    assert_eq!(entries.len(), 3);
    assert_eq!(entry(&entries, Operation::Insert, "description").new_value, None);
}

#[tokio::test]
async fn test_update_records_only_changed_fields() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert_entity(&SystemParameter::new("centralServerAddress", "10.0.0.1"))
        .await
        .unwrap();
    session.commit().await.unwrap();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("bob".to_string())));
    let updated = session
        .update(
            "system_parameters",
            id,
            FieldMap::new().with("value", "10.0.0.2"),
        )
        .await
        .unwrap();
    assert!(updated);
    session.commit().await.unwrap();

    let entries = history(&store, "system_parameters", id);
    assert_eq!(entries.len(), 5);
    let updates: Vec<&AuditEntry> = entries
        .iter()
        .filter(|e| e.operation == Operation::Update)
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].field_name, "value");
    assert_eq!(updates[0].old_value.as_deref(), Some("10.0.0.1"));
    assert_eq!(updates[0].new_value.as_deref(), Some("10.0.0.2"));
    assert_eq!(updates[0].actor, "bob");
    assert_eq!(updates[0].node_name.as_deref(), Some("node_0"));
}

#[tokio::test]
async fn test_update_with_k_changed_fields_writes_k_entries() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert_entity(&MemberClass::new("GOV", "Government"))
        .await
        .unwrap();
    session
        .update(
            "member_classes",
            id,
            FieldMap::new()
                .with("code", "GOVT")
                .with("description", "Government body"),
        )
        .await
        .unwrap();
    session.commit().await.unwrap();

    let entries = history(&store, "member_classes", id);
    assert_eq!(
        entries
            .iter()
            .filter(|e| e.operation == Operation::Update)
            .count(),
        2
    );
    let code = entry(&entries, Operation::Update, "code");
    assert_eq!(code.old_value.as_deref(), Some("GOV"));
    assert_eq!(code.new_value.as_deref(), Some("GOVT"));
}

#[tokio::test]
async fn test_noop_update_writes_nothing() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert_entity(&SystemParameter::new("centralServerAddress", "10.0.0.1"))
        .await
        .unwrap();
    session.commit().await.unwrap();
    let before = ledger_size(&store);

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let updated = session
        .update(
            "system_parameters",
            id,
            FieldMap::new().with("value", "10.0.0.1"),
        )
        .await
        .unwrap();
    assert!(updated);
    session.commit().await.unwrap();

    assert_eq!(ledger_size(&store), before);
}

#[tokio::test]
async fn test_storage_normalized_values_are_not_changes() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert(
            "prices",
            FieldMap::new().with("amount", 1.5f64).with("quantity", 10i64),
        )
        .await
        .unwrap();
    session.commit().await.unwrap();
    let before = ledger_size(&store);

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    session
        .update(
            "prices",
            id,
            FieldMap::new().with("amount", "1.50").with("quantity", "10"),
        )
        .await
        .unwrap();
    session.commit().await.unwrap();

    assert_eq!(ledger_size(&store), before);
}

#[tokio::test]
async fn test_delete_records_old_values() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert_entity(&MemberClass::new("GOV", "Government"))
        .await
        .unwrap();
    session.commit().await.unwrap();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("carol".to_string())));
    assert!(session.delete("member_classes", id).await.unwrap());
    assert!(!session.delete("member_classes", id).await.unwrap());
    session.commit().await.unwrap();

    let entries = history(&store, "member_classes", id);
    let deletes: Vec<&AuditEntry> = entries
        .iter()
        .filter(|e| e.operation == Operation::Delete)
        .collect();
    assert_eq!(deletes.len(), 3);
    assert!(deletes.iter().all(|e| e.new_value.is_none()));
    assert!(deletes.iter().all(|e| e.actor == "carol"));
    assert_eq!(
        entry(&entries, Operation::Delete, "description").old_value.as_deref(),
        Some("Government")
    );
}

#[tokio::test]
async fn test_dropped_session_rolls_back_audit() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    {
        let tx = store.begin().unwrap();
        let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
        session
            .insert_entity(&MemberClass::new("GOV", "Government"))
            .await
            .unwrap();
    }

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    session
        .insert_entity(&MemberClass::new("COM", "Commercial"))
        .await
        .unwrap();
    session.rollback().await.unwrap();

    assert_eq!(ledger_size(&store), 0);
    let rows: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM member_classes", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 0);
}

fn member_class_count(store: &SqliteStore) -> i64 {
    store
        .connection()
        .query_row("SELECT COUNT(*) FROM member_classes", [], |row| row.get(0))
        .unwrap()
}

#[tokio::test]
async fn test_failed_audit_write_aborts_insert() {
    let (_dir, mut store) = open_store();
    let layer = layer();
    store
        .connection()
        .execute_batch("ALTER TABLE history RENAME TO history_archive")
        .unwrap();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let result = session
        .insert_entity(&MemberClass::new("GOV", "Government"))
        .await;
    assert!(result.is_err());
    // The caller ignoring the error still cannot persist the row
    assert!(session.commit().await.is_err());

    assert_eq!(member_class_count(&store), 0);
}

#[tokio::test]
async fn test_failed_audit_write_aborts_update() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert_entity(&MemberClass::new("GOV", "Government"))
        .await
        .unwrap();
    session.commit().await.unwrap();

    store
        .connection()
        .execute_batch("ALTER TABLE history RENAME TO history_archive")
        .unwrap();

    {
        let tx = store.begin().unwrap();
        let mut session = layer.session(tx, layer.request_context(Some("bob".to_string())));
        let result = session
            .update(
                "member_classes",
                id,
                FieldMap::new().with("description", "Public sector"),
            )
            .await;
        assert!(result.is_err());
    }

    let description: String = store
        .connection()
        .query_row(
            "SELECT description FROM member_classes WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(description, "Government");
}

#[tokio::test]
async fn test_entities_follow_configured_node_column() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SqliteStore::open(dir.path().join("ledger.db"), "sqlite").unwrap();
    let config = CaptureConfig {
        node_column: "owner_node".to_string(),
        ..CaptureConfig::default()
    };
    sqlite::install_schema(&store, &config).unwrap();
    let layer = CaptureLayer::from_config(
        &config,
        Arc::new(TopologyDetector::new(Topology::SingleNode)),
    )
    .unwrap();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert_entity(&SystemParameter::new("centralServerAddress", "10.0.0.1"))
        .await
        .unwrap();
    let mut loaded: SystemParameter = session.load_entity(id).await.unwrap().unwrap();
    assert_eq!(loaded.node_name.as_deref(), Some("node_0"));

    // Carrying the loaded node name back is not a change of owner
    loaded.value = Some("10.0.0.9".to_string());
    assert!(session.update_entity(&loaded).await.unwrap());
    session.commit().await.unwrap();

    let entries = history(&store, "system_parameters", id);
    assert_eq!(
        entry(&entries, Operation::Insert, "owner_node").new_value.as_deref(),
        Some("node_0")
    );
    assert!(entries
        .iter()
        .all(|e| e.node_name.as_deref() == Some("node_0")));
}

#[tokio::test]
async fn test_ledger_writes_are_refused() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("mallory".to_string())));
    let err = session
        .insert("history", FieldMap::new().with("field_name", "x"))
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<CaptureError>(),
        Some(&CaptureError::LedgerWriteRefused("history".to_string()))
    );
    assert!(session.delete("history", 1).await.is_err());
    assert!(session.truncate("history").await.is_err());
}

#[tokio::test]
async fn test_partitioned_insert_is_tagged_with_default_node() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert(
            "system_parameters",
            FieldMap::new()
                .with("key", "centralServerAddress")
                .with("value", "10.0.0.1")
                .with("ha_node_name", "node_9"),
        )
        .await
        .unwrap();
    let loaded: SystemParameter = session.load_entity(id).await.unwrap().unwrap();
    session.commit().await.unwrap();

    assert_eq!(loaded.node_name.as_deref(), Some("node_0"));
    let entries = history(&store, "system_parameters", id);
    assert_eq!(entries.len(), 4);
    assert_eq!(
        entry(&entries, Operation::Insert, "ha_node_name").new_value.as_deref(),
        Some("node_0")
    );
    assert!(entries
        .iter()
        .all(|e| e.node_name.as_deref() == Some("node_0")));
}

#[tokio::test]
async fn test_multi_master_insert_is_tagged_with_active_node() {
    let (_dir, mut store) = open_store();
    let layer = layer_with(Topology::MultiMaster {
        active_node: Some("node_2".to_string()),
    });

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert_entity(&SystemParameter::new("centralServerAddress", "10.0.0.2"))
        .await
        .unwrap();
    session.commit().await.unwrap();

    let entries = history(&store, "system_parameters", id);
    assert!(entries
        .iter()
        .all(|e| e.node_name.as_deref() == Some("node_2")));
}

#[tokio::test]
async fn test_node_name_cannot_change() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert_entity(&SystemParameter::new("centralServerAddress", "10.0.0.1"))
        .await
        .unwrap();
    session.commit().await.unwrap();
    let before = ledger_size(&store);

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let err = session
        .update(
            "system_parameters",
            id,
            FieldMap::new()
                .with("value", "10.0.0.3")
                .with("ha_node_name", "node_1"),
        )
        .await
        .unwrap_err();
    match err.downcast_ref::<CaptureError>() {
        Some(CaptureError::NodeNameImmutable {
            current, requested, ..
        }) => {
            assert_eq!(current, "node_0");
            assert_eq!(requested, "node_1");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // Writing back the current node is allowed.
    let mut loaded: SystemParameter = session.load_entity(id).await.unwrap().unwrap();
    loaded.value = Some("10.0.0.4".to_string());
    assert!(session.update_entity(&loaded).await.unwrap());
    session.commit().await.unwrap();

    assert_eq!(ledger_size(&store), before + 1);
}

#[tokio::test]
async fn test_update_where_captures_each_row() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let a = session
        .insert_entity(&MemberClass::new("GOV", "old"))
        .await
        .unwrap();
    let b = session
        .insert_entity(&MemberClass::new("COM", "old"))
        .await
        .unwrap();
    let c = session
        .insert_entity(&MemberClass::new("NGO", "current"))
        .await
        .unwrap();
    let updated = session
        .update_where(
            "member_classes",
            "description",
            Some("old"),
            FieldMap::new().with("description", "new"),
        )
        .await
        .unwrap();
    session.commit().await.unwrap();

    assert_eq!(updated, 2);
    for id in [a, b] {
        let entries = history(&store, "member_classes", id);
        let change = entry(&entries, Operation::Update, "description");
        assert_eq!(change.old_value.as_deref(), Some("old"));
        assert_eq!(change.new_value.as_deref(), Some("new"));
    }
    assert!(history(&store, "member_classes", c)
        .iter()
        .all(|e| e.operation == Operation::Insert));
}

#[tokio::test]
async fn test_delete_where_captures_each_row() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let a = session
        .insert("member_classes", FieldMap::new().with("code", "A").with("description", None::<String>))
        .await
        .unwrap();
    let b = session
        .insert("member_classes", FieldMap::new().with("code", "B").with("description", None::<String>))
        .await
        .unwrap();
    let deleted = session
        .delete_where("member_classes", "description", None)
        .await
        .unwrap();
    session.commit().await.unwrap();

    assert_eq!(deleted, 2);
    for id in [a, b] {
        let entries = history(&store, "member_classes", id);
        assert_eq!(
            entries
                .iter()
                .filter(|e| e.operation == Operation::Delete)
                .count(),
            3
        );
    }
}

#[tokio::test]
async fn test_truncate_of_tracked_table_is_unsupported() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    session
        .insert_entity(&MemberClass::new("GOV", "Government"))
        .await
        .unwrap();
    let err = session.truncate("member_classes").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CaptureError>(),
        Some(CaptureError::UnsupportedOperation { .. })
    ));

    session
        .insert("scratch", FieldMap::new().with("note", "temp"))
        .await
        .unwrap();
    session.truncate("scratch").await.unwrap();
    session.commit().await.unwrap();

    let scratch: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM scratch", [], |row| row.get(0))
        .unwrap();
    assert_eq!(scratch, 0);
}

#[tokio::test]
async fn test_untracked_table_writes_no_entries() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let id = session
        .insert("scratch", FieldMap::new().with("note", "temp"))
        .await
        .unwrap();
    session
        .update("scratch", id, FieldMap::new().with("note", "changed"))
        .await
        .unwrap();
    session.commit().await.unwrap();

    assert_eq!(ledger_size(&store), 0);
}

#[tokio::test]
async fn test_missing_actor_credits_session_user() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    for actor in [None, Some("   ".to_string())] {
        let tx = store.begin().unwrap();
        let mut session = layer.session(tx, layer.request_context(actor));
        assert_eq!(session.actor(), "sqlite");
        let id = session
            .insert_entity(&MemberClass::new("GOV", "Government"))
            .await
            .unwrap();
        session.commit().await.unwrap();

        assert!(history(&store, "member_classes", id)
            .iter()
            .all(|e| e.actor == "sqlite"));
        let tx = store.begin().unwrap();
        let mut session = layer.session(tx, layer.request_context(None));
        session.delete("member_classes", id).await.unwrap();
        session.commit().await.unwrap();
    }
}

#[tokio::test]
async fn test_update_of_missing_row_returns_false() {
    let (_dir, mut store) = open_store();
    let layer = layer();

    let tx = store.begin().unwrap();
    let mut session = layer.session(tx, layer.request_context(Some("alice".to_string())));
    let updated = session
        .update("member_classes", 999, FieldMap::new().with("code", "X"))
        .await
        .unwrap();
    assert!(!updated);
    assert!(session
        .update("member_classes", 1, FieldMap::new().with("id", 2i64))
        .await
        .is_err());
    session.commit().await.unwrap();

    assert_eq!(ledger_size(&store), 0);
}
