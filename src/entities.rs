// ABOUTME: TrackedEntity capability and the reference entities of the capture layer
// ABOUTME: system_parameters, distributed_files and member_classes as typed rows

use anyhow::Result;
use chrono::NaiveDateTime;

use crate::row::FieldMap;

/// A row type that can flow through a capture session.
///
/// `to_fields` leaves out `id` when the entity has not been stored yet, and
/// leaves out the node column when it is unset (the tagger assigns it).
/// `node_column` is the configured name of that column.
pub trait TrackedEntity: Sized {
    const TABLE: &'static str;
    /// Whether the change interceptor audits this table.
    const TRACKED: bool = true;
    /// Whether the node tagger owns this table's node column.
    const NODE_PARTITIONED: bool = false;

    fn id(&self) -> Option<i64>;

    fn to_fields(&self, node_column: &str) -> FieldMap;

    fn from_fields(fields: &FieldMap, node_column: &str) -> Result<Self>;
}

/// Per-node configuration parameter, unique on `(key, ha_node_name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemParameter {
    pub id: Option<i64>,
    pub key: String,
    pub value: Option<String>,
    pub node_name: Option<String>,
}

impl SystemParameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: None,
            key: key.into(),
            value: Some(value.into()),
            node_name: None,
        }
    }
}

impl TrackedEntity for SystemParameter {
    const TABLE: &'static str = "system_parameters";
    const NODE_PARTITIONED: bool = true;

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn to_fields(&self, node_column: &str) -> FieldMap {
        let mut fields = FieldMap::new()
            .with("key", &self.key)
            .with("value", &self.value);
        if let Some(id) = self.id {
            fields.set("id", id);
        }
        if let Some(node) = &self.node_name {
            fields.set(node_column, node);
        }
        fields
    }

    fn from_fields(fields: &FieldMap, node_column: &str) -> Result<Self> {
        Ok(Self {
            id: Some(fields.parse("id")?),
            key: fields.text("key")?,
            value: fields.value("value").map(str::to_string),
            node_name: fields.value(node_column).map(str::to_string),
        })
    }
}

/// A configuration artifact published for one node. Node-partitioned but not
/// audited.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedFile {
    pub id: Option<i64>,
    pub file_name: String,
    pub file_data: Option<Vec<u8>>,
    pub content_identifier: String,
    pub file_updated_at: NaiveDateTime,
    pub version: i32,
    pub node_name: Option<String>,
}

impl TrackedEntity for DistributedFile {
    const TABLE: &'static str = "distributed_files";
    const TRACKED: bool = false;
    const NODE_PARTITIONED: bool = true;

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn to_fields(&self, node_column: &str) -> FieldMap {
        let mut fields = FieldMap::new()
            .with("file_name", &self.file_name)
            .with("file_data", &self.file_data)
            .with("content_identifier", &self.content_identifier)
            .with("file_updated_at", self.file_updated_at)
            .with("version", self.version);
        if let Some(id) = self.id {
            fields.set("id", id);
        }
        if let Some(node) = &self.node_name {
            fields.set(node_column, node);
        }
        fields
    }

    fn from_fields(fields: &FieldMap, node_column: &str) -> Result<Self> {
        let file_data = match fields.value("file_data") {
            Some(_) => Some(fields.bytes("file_data")?),
            None => None,
        };
        Ok(Self {
            id: Some(fields.parse("id")?),
            file_name: fields.text("file_name")?,
            file_data,
            content_identifier: fields.text("content_identifier")?,
            file_updated_at: fields.timestamp("file_updated_at")?,
            version: fields.parse("version")?,
            node_name: fields.value(node_column).map(str::to_string),
        })
    }
}

/// Member class: a tracked table that is shared by all nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberClass {
    pub id: Option<i64>,
    pub code: String,
    pub description: Option<String>,
}

impl MemberClass {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: None,
            code: code.into(),
            description: Some(description.into()),
        }
    }
}

impl TrackedEntity for MemberClass {
    const TABLE: &'static str = "member_classes";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn to_fields(&self, _node_column: &str) -> FieldMap {
        let mut fields = FieldMap::new()
            .with("code", &self.code)
            .with("description", &self.description);
        if let Some(id) = self.id {
            fields.set("id", id);
        }
        fields
    }

    fn from_fields(fields: &FieldMap, _node_column: &str) -> Result<Self> {
        Ok(Self {
            id: Some(fields.parse("id")?),
            code: fields.text("code")?,
            description: fields.value("description").map(str::to_string),
        })
    }
}
