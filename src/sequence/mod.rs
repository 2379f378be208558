// ABOUTME: Sequence reconciliation after restore, merge or node rejoin
// ABOUTME: Exports the catalog bindings and the Reconciler

pub mod catalog;
pub mod reconciler;

pub use catalog::{CatalogEntry, SequenceBinding};
pub use reconciler::{
    AdvanceMode, ReconcileReport, Reconciler, SequenceFailure, SequenceOutcome, SequenceStore,
};
