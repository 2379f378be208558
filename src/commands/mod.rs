// ABOUTME: Command implementations for the change-ledger CLI
// ABOUTME: Exports install_schema, topology, reconcile_sequences, cluster_status and history

pub mod cluster_status;
pub mod history;
pub mod install_schema;
pub mod reconcile;
pub mod topology;

pub use cluster_status::cluster_status;
pub use history::history;
pub use install_schema::install_schema;
pub use reconcile::reconcile_sequences;
pub use topology::topology;
