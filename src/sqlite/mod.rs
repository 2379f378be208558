// ABOUTME: SQLite backend: single-node deployments and tests
// ABOUTME: Emulates PostgreSQL sequences so identity and reconciliation behave the same

pub mod converter;
pub mod schema;
pub mod sequences;
pub mod store;

pub use schema::install_schema;
pub use sequences::{register_sequence, SEQUENCE_TABLE};
pub use store::{SqliteStore, SqliteTransaction};
