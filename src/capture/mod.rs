// ABOUTME: Change-capture layer: row differ, audit writer, interceptor and write sessions
// ABOUTME: CaptureLayer is the process-wide, immutable entry point

pub mod diff;
pub mod error;
pub mod hook;
pub mod interceptor;
pub mod ledger;
pub mod registry;
pub mod session;

use anyhow::Result;
use std::sync::Arc;

pub use diff::{diff, ChangedField};
pub use error::CaptureError;
pub use hook::{HookGranularity, HookSpec, HookTiming};
pub use interceptor::{ChangeInterceptor, RowImage, WriteKind};
pub use ledger::{Attribution, AuditEntry, AuditWriter, LedgerSink, NewAuditEntry, Operation};
pub use registry::{CaptureRegistry, CaptureRegistryBuilder};
pub use session::{CaptureSession, RowStore};

use crate::config::CaptureConfig;
use crate::context::RequestContext;
use crate::node::{NodeTagger, TopologyDetector};

/// Registry, interceptor, tagger and topology detector, shared by every
/// request.
#[derive(Debug, Clone)]
pub struct CaptureLayer {
    registry: CaptureRegistry,
    interceptor: ChangeInterceptor,
    tagger: NodeTagger,
    topology: Arc<TopologyDetector>,
}

impl CaptureLayer {
    pub fn new(
        registry: CaptureRegistry,
        tagger: NodeTagger,
        topology: Arc<TopologyDetector>,
    ) -> Self {
        let interceptor = ChangeInterceptor::new(
            AuditWriter::new(registry.ledger_table()),
            tagger.column(),
        );
        Self {
            registry,
            interceptor,
            tagger,
            topology,
        }
    }

    /// Layer described by the `[capture]` configuration section.
    pub fn from_config(config: &CaptureConfig, topology: Arc<TopologyDetector>) -> Result<Self> {
        let registry = CaptureRegistry::from_config(config)?;
        let tagger = NodeTagger::new(&config.node_column, &config.default_node_name);
        Ok(Self::new(registry, tagger, topology))
    }

    pub fn registry(&self) -> &CaptureRegistry {
        &self.registry
    }

    pub fn tagger(&self) -> &NodeTagger {
        &self.tagger
    }

    pub fn topology(&self) -> &TopologyDetector {
        &self.topology
    }

    /// Context for a new request: `actor` plus the topology as of now.
    pub fn request_context(&self, actor: Option<String>) -> RequestContext {
        RequestContext::new(actor, self.topology.current_topology())
    }

    /// Open a capture session over an already-started transaction.
    pub fn session<S: RowStore>(&self, store: S, context: RequestContext) -> CaptureSession<'_, S> {
        CaptureSession::new(self, store, context)
    }
}
