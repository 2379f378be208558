// ABOUTME: PostgreSQL backend: connections, row store, sequences and schema
// ABOUTME: The production storage engine, including multi-master deployments

pub mod connection;
pub mod schema;
pub mod sequences;
pub mod store;

pub use connection::{connect, connect_with_retry, init_tls_policy};
pub use schema::install_schema;
pub use store::{PgStore, PgTransaction};
