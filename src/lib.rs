// ABOUTME: Library root for change-ledger
// ABOUTME: Field-level change capture, node identity tagging and sequence reconciliation

pub mod capture;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod context;
pub mod entities;
pub mod node;
pub mod postgres;
pub mod row;
pub mod sequence;
pub mod sqlite;
pub mod store;
pub mod utils;

pub use capture::{CaptureError, CaptureLayer, CaptureSession};
pub use config::Config;
pub use context::RequestContext;
pub use row::FieldMap;
pub use store::Store;
