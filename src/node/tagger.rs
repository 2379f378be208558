// ABOUTME: Node identity tagger - stamps the owning node on node-partitioned rows
// ABOUTME: Runs before the write; the stamped value is immutable afterwards

use crate::capture::error::CaptureError;
use crate::capture::hook::HookSpec;
use crate::row::FieldMap;

use super::topology::Topology;

/// Column carrying the owning node on node-partitioned tables.
pub const DEFAULT_NODE_COLUMN: &str = "ha_node_name";

/// Identity used when no active node is known.
pub const DEFAULT_NODE_NAME: &str = "node_0";

#[derive(Debug, Clone)]
pub struct NodeTagger {
    column: String,
    default_node: String,
}

impl Default for NodeTagger {
    fn default() -> Self {
        Self::new(DEFAULT_NODE_COLUMN, DEFAULT_NODE_NAME)
    }
}

impl NodeTagger {
    pub fn new(column: impl Into<String>, default_node: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            default_node: default_node.into(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn default_node(&self) -> &str {
        &self.default_node
    }

    /// The tagger rewrites row content, so it has to run BEFORE ROW.
    pub fn validate_registration(table: &str, spec: HookSpec) -> Result<(), CaptureError> {
        if spec != HookSpec::BEFORE_ROW {
            return Err(CaptureError::InvalidHook {
                component: "node tagging",
                table: table.to_string(),
                expected: HookSpec::BEFORE_ROW,
                actual: spec,
            });
        }
        Ok(())
    }

    /// Node identity for a new row under `topology`.
    pub fn resolve<'a>(&'a self, topology: &'a Topology) -> &'a str {
        topology.active_node().unwrap_or(&self.default_node)
    }

    /// Assign the node column of a row about to be inserted, overwriting any
    /// caller-supplied value.
    pub fn stamp(&self, fields: &mut FieldMap, topology: &Topology) {
        let node = self.resolve(topology);
        if let Some(supplied) = fields.value(&self.column) {
            if supplied != node {
                tracing::debug!(
                    "Replacing caller-supplied {} '{}' with '{}'",
                    self.column,
                    supplied,
                    node
                );
            }
        }
        fields.set(self.column.clone(), node);
    }

    /// Refuse an update that would move an existing row to another node.
    /// Writing back the current value is allowed.
    pub fn guard_update(
        &self,
        table: &str,
        record_id: i64,
        before: &FieldMap,
        changes: &FieldMap,
    ) -> Result<(), CaptureError> {
        let Some(requested) = changes.get(&self.column) else {
            return Ok(());
        };
        let current = before.get(&self.column).flatten();
        if requested == current {
            return Ok(());
        }
        Err(CaptureError::NodeNameImmutable {
            table: table.to_string(),
            record_id,
            column: self.column.clone(),
            current: current.unwrap_or("NULL").to_string(),
            requested: requested.unwrap_or("NULL").to_string(),
        })
    }
}
