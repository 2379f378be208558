// ABOUTME: Topology detector - single node vs multi-master, resolved at startup
// ABOUTME: Probes the replication extension and the local node name via TopologyProbe

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::RwLock;

use crate::config::TopologyConfig;

/// Deployment topology as seen by the node tagger and the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Topology {
    SingleNode,
    MultiMaster { active_node: Option<String> },
}

impl Topology {
    pub fn is_multi_master(&self) -> bool {
        matches!(self, Topology::MultiMaster { .. })
    }

    /// The active node reported by the replication subsystem, if any.
    pub fn active_node(&self) -> Option<&str> {
        match self {
            Topology::SingleNode => None,
            Topology::MultiMaster { active_node } => active_node.as_deref(),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::SingleNode => f.write_str("single-node"),
            Topology::MultiMaster {
                active_node: Some(node),
            } => write!(f, "multi-master (active node '{}')", node),
            Topology::MultiMaster { active_node: None } => {
                f.write_str("multi-master (active node unknown)")
            }
        }
    }
}

/// How the topology is chosen at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyMode {
    #[default]
    Auto,
    SingleNode,
    MultiMaster,
}

/// Backend queries needed to resolve the topology.
#[allow(async_fn_in_trait)]
pub trait TopologyProbe {
    /// Whether the multi-master replication extension is installed.
    async fn has_extension(&self, extension: &str) -> Result<bool>;

    /// Ask the replication extension for the local node's logical name.
    async fn local_node_name(&self, function: &str) -> Result<Option<String>>;
}

/// Resolve the topology once, following `config.mode`.
///
/// An unknown node name is not an error: the tagger falls back to its default
/// identity for `MultiMaster { active_node: None }`.
pub async fn resolve_topology<P: TopologyProbe>(
    probe: &P,
    config: &TopologyConfig,
) -> Result<Topology> {
    let multi_master = match config.mode {
        TopologyMode::SingleNode => false,
        TopologyMode::MultiMaster => true,
        TopologyMode::Auto => probe
            .has_extension(&config.extension)
            .await
            .with_context(|| {
                format!(
                    "Failed to probe for replication extension '{}'",
                    config.extension
                )
            })?,
    };

    if !multi_master {
        tracing::info!("Resolved topology: single-node");
        return Ok(Topology::SingleNode);
    }

    let active_node = match config.node_name.as_deref().filter(|n| !n.is_empty()) {
        Some(configured) => Some(configured.to_string()),
        None => match probe.local_node_name(&config.node_name_function).await {
            Ok(Some(name)) if !name.is_empty() => Some(name),
            Ok(_) => {
                tracing::warn!(
                    "{}() returned no node name; new rows will get the default node name",
                    config.node_name_function
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read local node name via {}(): {:#}; new rows will get the default node name",
                    config.node_name_function,
                    e
                );
                None
            }
        },
    };

    let topology = Topology::MultiMaster { active_node };
    tracing::info!("Resolved topology: {}", topology);
    Ok(topology)
}

/// Holds the current topology snapshot.
///
/// Reads are a cloned snapshot under a read lock; `refresh` swaps the snapshot
/// when a topology change event is observed.
#[derive(Debug)]
pub struct TopologyDetector {
    current: RwLock<Topology>,
}

impl TopologyDetector {
    pub fn new(topology: Topology) -> Self {
        Self {
            current: RwLock::new(topology),
        }
    }

    pub fn current_topology(&self) -> Topology {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the snapshot. Requests already in flight keep the snapshot they
    /// started with.
    pub fn refresh(&self, topology: Topology) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != topology {
            tracing::info!("Topology changed: {} -> {}", current, topology);
        }
        *current = topology;
    }
}
