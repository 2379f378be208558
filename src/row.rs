// ABOUTME: FieldMap - ordered field-name to text-snapshot map for row images
// ABOUTME: Values are compared and stored in their serialized textual form

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Timestamp layout used when writing timestamps into a row image.
///
/// PostgreSQL and SQLite both accept it on input; images read back from the
/// database carry whatever rendering the database produced.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A row image: column name to nullable text value.
///
/// Keys are kept in sorted order so that diffs and ledger entries come out in
/// a stable order regardless of the backend's column order. A key mapped to
/// `None` is a present column holding SQL NULL, which is distinct from an
/// absent key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    fields: BTreeMap<String, Option<String>>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`FieldMap::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl ToFieldText) -> Self {
        self.set(name, value);
        self
    }

    /// Set a column to the textual form of `value` (`None` stores NULL).
    pub fn set(&mut self, name: impl Into<String>, value: impl ToFieldText) {
        self.fields.insert(name.into(), value.to_field_text());
    }

    pub fn set_null(&mut self, name: impl Into<String>) {
        self.fields.insert(name.into(), None);
    }

    /// Insert an already-serialized value, as read back from storage.
    pub fn insert_raw(&mut self, name: impl Into<String>, value: Option<String>) {
        self.fields.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Option<String>> {
        self.fields.remove(name)
    }

    /// `None` when the column is absent, `Some(None)` when it holds NULL.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.fields.get(name).map(|v| v.as_deref())
    }

    /// The non-null text value of a column.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).flatten()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Required non-null text column.
    pub fn text(&self, name: &str) -> Result<String> {
        self.value(name)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Column '{}' is missing or NULL", name))
    }

    /// Required column parsed with `FromStr`.
    pub fn parse<T>(&self, name: &str) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        let raw = self.text(name)?;
        raw.parse::<T>()
            .with_context(|| format!("Column '{}' has unparseable value '{}'", name, raw))
    }

    /// Optional column parsed with `FromStr`; NULL and absent both give `None`.
    pub fn parse_opt<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.value(name) {
            Some(_) => self.parse(name).map(Some),
            None => Ok(None),
        }
    }

    /// Required timestamp column. Accepts both the space and the `T`
    /// separated layouts, which is how SQLite and PostgreSQL JSON render them.
    pub fn timestamp(&self, name: &str) -> Result<NaiveDateTime> {
        let raw = self.text(name)?;
        parse_timestamp(&raw)
            .with_context(|| format!("Column '{}' has unparseable timestamp '{}'", name, raw))
    }

    /// Required binary column stored as `\x`-prefixed hex.
    pub fn bytes(&self, name: &str) -> Result<Vec<u8>> {
        let raw = self.text(name)?;
        let digits = raw.strip_prefix("\\x").unwrap_or(&raw);
        hex::decode(digits)
            .with_context(|| format!("Column '{}' does not hold hex-encoded bytes", name))
    }
}

impl FromIterator<(String, Option<String>)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let normalized = raw.replacen('T', " ", 1);
    NaiveDateTime::parse_from_str(&normalized, TIMESTAMP_FORMAT).map_err(Into::into)
}

/// Conversion of a Rust value into the text snapshot stored in a row image.
pub trait ToFieldText {
    fn to_field_text(&self) -> Option<String>;
}

impl ToFieldText for str {
    fn to_field_text(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl ToFieldText for String {
    fn to_field_text(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl<T: ToFieldText + ?Sized> ToFieldText for &T {
    fn to_field_text(&self) -> Option<String> {
        (**self).to_field_text()
    }
}

impl<T: ToFieldText> ToFieldText for Option<T> {
    fn to_field_text(&self) -> Option<String> {
        self.as_ref().and_then(ToFieldText::to_field_text)
    }
}

macro_rules! display_field_text {
    ($($ty:ty),*) => {
        $(
            impl ToFieldText for $ty {
                fn to_field_text(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

display_field_text!(i16, i32, i64, u16, u32, u64, f32, f64, bool);

impl ToFieldText for NaiveDateTime {
    fn to_field_text(&self) -> Option<String> {
        Some(self.format(TIMESTAMP_FORMAT).to_string())
    }
}

impl ToFieldText for [u8] {
    fn to_field_text(&self) -> Option<String> {
        Some(format!("\\x{}", hex::encode(self)))
    }
}

impl ToFieldText for Vec<u8> {
    fn to_field_text(&self) -> Option<String> {
        self.as_slice().to_field_text()
    }
}
