// ABOUTME: Multi-node identity: topology detection and node tagging
// ABOUTME: Exports Topology, TopologyDetector and NodeTagger

pub mod tagger;
pub mod topology;

pub use tagger::{NodeTagger, DEFAULT_NODE_COLUMN, DEFAULT_NODE_NAME};
pub use topology::{resolve_topology, Topology, TopologyDetector, TopologyMode, TopologyProbe};
