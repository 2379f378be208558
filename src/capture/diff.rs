// ABOUTME: Row differ - computes the changed fields between two row images
// ABOUTME: Comparison is on text snapshots; an empty result means "do not audit"

use crate::row::FieldMap;
use std::collections::BTreeSet;

/// One field that differs between the before and after images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedField {
    pub name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// Compute the changed fields between `before` and `after`.
///
/// - insert (`before` is `None`): every field of `after`, with no old value
/// - delete (`after` is `None`): every field of `before`, with no new value
/// - update: every field whose text differs, including fields present on only
///   one side; equal fields are left out
///
/// NULL-valued fields count as present. Values are never coerced, so `"1.50"`
/// and `"1.5"` differ unless the storage already normalized them.
pub fn diff(before: Option<&FieldMap>, after: Option<&FieldMap>) -> Vec<ChangedField> {
    match (before, after) {
        (None, None) => Vec::new(),
        (None, Some(after)) => after
            .iter()
            .map(|(name, value)| ChangedField {
                name: name.to_string(),
                old_value: None,
                new_value: value.map(str::to_string),
            })
            .collect(),
        (Some(before), None) => before
            .iter()
            .map(|(name, value)| ChangedField {
                name: name.to_string(),
                old_value: value.map(str::to_string),
                new_value: None,
            })
            .collect(),
        (Some(before), Some(after)) => {
            let names: BTreeSet<&str> = before.names().chain(after.names()).collect();
            names
                .into_iter()
                .filter_map(|name| {
                    let old = before.get(name);
                    let new = after.get(name);
                    if old == new {
                        return None;
                    }
                    Some(ChangedField {
                        name: name.to_string(),
                        old_value: old.flatten().map(str::to_string),
                        new_value: new.flatten().map(str::to_string),
                    })
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameter(value: &str) -> FieldMap {
        FieldMap::new()
            .with("id", 1i64)
            .with("key", "centralServerAddress")
            .with("value", value)
    }

    #[test]
    fn test_insert_reports_every_field() {
        let after = parameter("10.0.0.1");
        let changes = diff(None, Some(&after));
        assert_eq!(changes.len(), 3);
        let value = changes.iter().find(|c| c.name == "value").unwrap();
        assert_eq!(value.old_value, None);
        assert_eq!(value.new_value.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_delete_reports_every_field() {
        let before = parameter("10.0.0.1");
        let changes = diff(Some(&before), None);
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().all(|c| c.new_value.is_none()));
    }

    #[test]
    fn test_update_reports_only_changed_fields() {
        let changes = diff(Some(&parameter("10.0.0.1")), Some(&parameter("10.0.0.2")));
        assert_eq!(
            changes,
            vec![ChangedField {
                name: "value".to_string(),
                old_value: Some("10.0.0.1".to_string()),
                new_value: Some("10.0.0.2".to_string()),
            }]
        );
    }

    #[test]
    fn test_identical_update_is_empty() {
        let row = parameter("10.0.0.1");
        assert!(diff(Some(&row), Some(&row.clone())).is_empty());
    }

    #[test]
    fn test_null_transitions_are_changes() {
        let before = FieldMap::new().with("value", None::<String>);
        let after = FieldMap::new().with("value", "x");
        assert_eq!(diff(Some(&before), Some(&after)).len(), 1);
        assert_eq!(diff(Some(&after), Some(&before)).len(), 1);
        assert!(diff(Some(&before), Some(&before)).is_empty());
    }

    #[test]
    fn test_present_to_absent_is_a_change() {
        let before = FieldMap::new().with("id", 1i64).with("extra", "x");
        let after = FieldMap::new().with("id", 1i64);
        let changes = diff(Some(&before), Some(&after));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].name, "extra");
        assert_eq!(changes[0].old_value.as_deref(), Some("x"));
        assert_eq!(changes[0].new_value, None);
    }

    #[test]
    fn test_no_implicit_numeric_coercion() {
        let before = FieldMap::new().with("amount", "1.50");
        let after = FieldMap::new().with("amount", 1.5f64);
        assert_eq!(diff(Some(&before), Some(&after)).len(), 1);
    }

    #[test]
    fn test_nothing_to_diff() {
        assert!(diff(None, None).is_empty());
    }
}
