// ABOUTME: Request-scoped context threaded from the CRUD boundary into capture
// ABOUTME: Carries the acting user and the topology snapshot taken at request start

use crate::node::Topology;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    actor: Option<String>,
    topology: Topology,
}

impl RequestContext {
    /// An empty actor is treated as absent.
    pub fn new(actor: Option<String>, topology: Topology) -> Self {
        Self {
            actor: actor.filter(|a| !a.trim().is_empty()),
            topology,
        }
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The acting user, or `session_identity` when the application supplied
    /// none. Never fails.
    pub fn resolve_actor(&self, session_identity: &str) -> String {
        match &self.actor {
            Some(actor) => actor.clone(),
            None => {
                tracing::debug!(
                    "No actor in request context, crediting session identity '{}'",
                    session_identity
                );
                session_identity.to_string()
            }
        }
    }
}
