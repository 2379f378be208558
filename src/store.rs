// ABOUTME: Backend selection by database URL and the operations the CLI needs
// ABOUTME: Dispatches to the PostgreSQL or SQLite store

use anyhow::Result;

use crate::capture::ledger::AuditEntry;
use crate::cluster::{ClusterNode, ClusterQuery};
use crate::config::Config;
use crate::node::{resolve_topology, Topology};
use crate::postgres::{self, PgStore};
use crate::sequence::{ReconcileReport, Reconciler};
use crate::sqlite::{self, SqliteStore};
use crate::utils::{is_postgres_url, sanitize_url};

pub enum Store {
    Postgres(PgStore),
    Sqlite(SqliteStore),
}

impl Store {
    /// `postgres://` and `postgresql://` URLs select PostgreSQL; anything
    /// else is a SQLite file path.
    pub async fn open(url: &str, config: &Config) -> Result<Self> {
        if is_postgres_url(url) {
            Ok(Store::Postgres(
                PgStore::connect(url, &config.database.schema).await?,
            ))
        } else {
            tracing::info!("Using SQLite database {}", sanitize_url(url));
            Ok(Store::Sqlite(SqliteStore::open(
                url,
                config.database.session_user.clone(),
            )?))
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Store::Postgres(_) => "postgresql",
            Store::Sqlite(_) => "sqlite",
        }
    }

    fn schema(&self) -> Option<&str> {
        match self {
            Store::Postgres(store) => Some(store.schema()),
            Store::Sqlite(_) => None,
        }
    }

    pub async fn install_schema(&self, config: &Config) -> Result<()> {
        match self {
            Store::Postgres(store) => postgres::install_schema(store, &config.capture).await,
            Store::Sqlite(store) => sqlite::install_schema(store, &config.capture),
        }
    }

    pub async fn detect_topology(&self, config: &Config) -> Result<Topology> {
        match self {
            Store::Postgres(store) => resolve_topology(store, &config.topology).await,
            Store::Sqlite(store) => resolve_topology(store, &config.topology).await,
        }
    }

    pub async fn reconcile_sequences(&self, reconciler: &Reconciler) -> Result<ReconcileReport> {
        match self {
            Store::Postgres(store) => reconciler.run(store).await,
            Store::Sqlite(store) => reconciler.run(store).await,
        }
    }

    pub async fn cluster_status(&self, config: &Config) -> Result<Vec<ClusterNode>> {
        let query = ClusterQuery::new(&config.cluster, self.schema(), &config.capture.node_column)?;
        match self {
            Store::Postgres(store) => store.cluster_status(&query).await,
            Store::Sqlite(store) => store.cluster_status(&query),
        }
    }

    pub async fn ledger_for_record(
        &self,
        config: &Config,
        table: &str,
        record_id: i64,
    ) -> Result<Vec<AuditEntry>> {
        let ledger = &config.capture.ledger_table;
        match self {
            Store::Postgres(store) => store.ledger_for_record(ledger, table, record_id).await,
            Store::Sqlite(store) => store.ledger_for_record(ledger, table, record_id),
        }
    }
}
