// ABOUTME: Cluster status view - one row per node with its address and last distribution
// ABOUTME: Read-only projection over the node configuration and artifact tables

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::config::ClusterConfig;
use crate::utils::{quote_ident, quote_qualified, validate_identifier};

/// One node of the cluster as seen by the operational dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterNode {
    pub node_name: String,
    pub address: Option<String>,
    pub last_distributed_at: Option<NaiveDateTime>,
}

/// The cluster status query for one deployment.
///
/// Every distinct node in the node configuration table appears exactly once,
/// whether or not it has an address or a distributed artifact. The address
/// key binds to `$1` and the artifact kind to `$2`; both PostgreSQL and
/// SQLite accept that placeholder syntax.
#[derive(Debug, Clone)]
pub struct ClusterQuery {
    sql: String,
    address_key: String,
    artifact_kind: String,
}

impl ClusterQuery {
    pub fn new(config: &ClusterConfig, schema: Option<&str>, node_column: &str) -> Result<Self> {
        validate_identifier(&config.node_table).context("Invalid cluster node table")?;
        validate_identifier(&config.artifact_table).context("Invalid cluster artifact table")?;
        validate_identifier(node_column).context("Invalid node column")?;
        if let Some(schema) = schema {
            validate_identifier(schema).context("Invalid schema name")?;
        }

        let node_table = quote_qualified(schema, &config.node_table);
        let artifact_table = quote_qualified(schema, &config.artifact_table);
        let node = quote_ident(node_column);

        let sql = format!(
            "SELECT n.node_name, a.address, d.last_distributed_at \
             FROM (SELECT DISTINCT {node} AS node_name FROM {node_table} \
                   WHERE {node} IS NOT NULL) n \
             LEFT JOIN (SELECT {node} AS node_name, MAX(\"value\") AS address \
                        FROM {node_table} WHERE \"key\" = $1 GROUP BY {node}) a \
               ON a.node_name = n.node_name \
             LEFT JOIN (SELECT {node} AS node_name, MAX(\"file_updated_at\") AS last_distributed_at \
                        FROM {artifact_table} WHERE \"content_identifier\" = $2 GROUP BY {node}) d \
               ON d.node_name = n.node_name \
             ORDER BY n.node_name",
        );

        Ok(Self {
            sql,
            address_key: config.address_key.clone(),
            artifact_kind: config.artifact_kind.clone(),
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn address_key(&self) -> &str {
        &self.address_key
    }

    pub fn artifact_kind(&self) -> &str {
        &self.artifact_kind
    }
}
