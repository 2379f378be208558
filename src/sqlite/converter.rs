// ABOUTME: SQLite value <-> row-image text conversion
// ABOUTME: Renders stored values the way row images and the ledger compare them

use rusqlite::types::{Value, ValueRef};

/// Render a stored SQLite value as row-image text
///
/// - INTEGER → decimal digits
/// - REAL → shortest round-trip decimal (`1.5`, `2`)
/// - TEXT → as stored; bytes that are not valid UTF-8 render as BLOB does
/// - BLOB → `\x`-prefixed lowercase hex, like PostgreSQL's bytea output
/// - NULL → `None`
///
/// # Examples
///
/// ```
/// # use change_ledger::sqlite::converter::sqlite_value_to_text;
/// # use rusqlite::types::ValueRef;
/// assert_eq!(sqlite_value_to_text(ValueRef::Integer(42)).as_deref(), Some("42"));
/// assert_eq!(sqlite_value_to_text(ValueRef::Null), None);
/// ```
pub fn sqlite_value_to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) => Some(match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => hex_literal(bytes),
        }),
        ValueRef::Blob(bytes) => Some(hex_literal(bytes)),
    }
}

fn hex_literal(bytes: &[u8]) -> String {
    format!("\\x{}", hex::encode(bytes))
}

/// Bind a row-image value as a SQLite parameter.
///
/// Values are bound as TEXT; column affinity converts them on storage, which
/// is what keeps `"10"` in an INTEGER column equal to `10` when read back.
/// For a BLOB column (`blob_column`), a `\x`-prefixed hex literal is decoded
/// and bound as BLOB. Anything else stays TEXT.
pub fn text_to_sqlite_value(value: Option<&str>, blob_column: bool) -> Value {
    match value {
        Some(text) if blob_column => match text.strip_prefix("\\x").map(hex::decode) {
            Some(Ok(bytes)) => Value::Blob(bytes),
            _ => Value::Text(text.to_string()),
        },
        Some(text) => Value::Text(text.to_string()),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_integer() {
        assert_eq!(sqlite_value_to_text(ValueRef::Integer(-7)).as_deref(), Some("-7"));
    }

    #[test]
    fn test_convert_real() {
        assert_eq!(sqlite_value_to_text(ValueRef::Real(1.5)).as_deref(), Some("1.5"));
        assert_eq!(sqlite_value_to_text(ValueRef::Real(2.0)).as_deref(), Some("2"));
    }

    #[test]
    fn test_convert_text() {
        assert_eq!(
            sqlite_value_to_text(ValueRef::Text(b"10.0.0.1")).as_deref(),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn test_convert_blob() {
        assert_eq!(
            sqlite_value_to_text(ValueRef::Blob(&[0x48, 0x69])).as_deref(),
            Some("\\x4869")
        );
    }

    #[test]
    fn test_convert_null() {
        assert_eq!(sqlite_value_to_text(ValueRef::Null), None);
        assert_eq!(text_to_sqlite_value(None, false), Value::Null);
        assert_eq!(text_to_sqlite_value(None, true), Value::Null);
    }

    #[test]
    fn test_invalid_utf8_text_renders_as_hex() {
        assert_eq!(
            sqlite_value_to_text(ValueRef::Text(&[0x61, 0xff, 0xfe])).as_deref(),
            Some("\\x61fffe")
        );
        // Two distinct invalid sequences stay distinct.
        assert_ne!(
            sqlite_value_to_text(ValueRef::Text(&[0xff])),
            sqlite_value_to_text(ValueRef::Text(&[0xfe]))
        );
    }

    #[test]
    fn test_blob_column_binds_hex_literal_as_blob() {
        assert_eq!(
            text_to_sqlite_value(Some("\\xdead"), true),
            Value::Blob(vec![0xde, 0xad])
        );
        assert_eq!(
            text_to_sqlite_value(Some("\\xdead"), false),
            Value::Text("\\xdead".to_string())
        );
        assert_eq!(
            text_to_sqlite_value(Some("\\xnothex"), true),
            Value::Text("\\xnothex".to_string())
        );
        assert_eq!(text_to_sqlite_value(Some("10"), false), Value::Text("10".to_string()));
    }
}
