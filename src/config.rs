// ABOUTME: TOML configuration for the capture layer, topology, cluster view and reconciler
// ABOUTME: Every section is optional; defaults match the reference deployment

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::capture::hook::{HookGranularity, HookSpec, HookTiming};
use crate::node::{TopologyMode, DEFAULT_NODE_COLUMN, DEFAULT_NODE_NAME};

/// Tables captured by default.
pub const DEFAULT_TRACKED_TABLES: &[&str] = &[
    "anchor_url_certs",
    "anchor_urls",
    "approved_cas",
    "approved_tsas",
    "auth_certs",
    "ca_infos",
    "central_services",
    "configuration_signing_keys",
    "configuration_sources",
    "global_group_members",
    "global_groups",
    "identifiers",
    "member_classes",
    "ocsp_infos",
    "request_processings",
    "requests",
    "security_categories",
    "security_server_client_names",
    "security_server_clients",
    "security_servers",
    "security_servers_security_categories",
    "server_clients",
    "system_parameters",
    "trusted_anchors",
    "ui_users",
];

/// Tables whose rows are owned by the node that created them.
pub const DEFAULT_NODE_PARTITIONED_TABLES: &[&str] =
    &["system_parameters", "distributed_files", "configuration_sources"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub capture: CaptureConfig,
    pub topology: TopologyConfig,
    pub cluster: ClusterConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// `postgres://` / `postgresql://` URL or a SQLite file path.
    pub url: Option<String>,
    /// PostgreSQL schema holding the tracked tables and the ledger.
    pub schema: String,
    /// Session identity credited on SQLite when no actor is supplied.
    pub session_user: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            schema: "public".to_string(),
            session_user: "sqlite".to_string(),
        }
    }
}

/// A table entry: either a bare name or a name with an explicit hook spec.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TableEntry {
    Name(String),
    Detailed {
        name: String,
        timing: Option<HookTiming>,
        granularity: Option<HookGranularity>,
    },
}

impl TableEntry {
    pub fn name(&self) -> &str {
        match self {
            TableEntry::Name(name) => name,
            TableEntry::Detailed { name, .. } => name,
        }
    }

    /// The hook spec this entry asks for, filling unset parts from `default`.
    pub fn hook_spec(&self, default: HookSpec) -> HookSpec {
        match self {
            TableEntry::Name(_) => default,
            TableEntry::Detailed {
                timing,
                granularity,
                ..
            } => HookSpec::new(
                timing.unwrap_or(default.timing),
                granularity.unwrap_or(default.granularity),
            ),
        }
    }
}

impl From<&str> for TableEntry {
    fn from(name: &str) -> Self {
        TableEntry::Name(name.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub ledger_table: String,
    pub node_column: String,
    pub default_node_name: String,
    pub tracked_tables: Vec<TableEntry>,
    pub node_partitioned_tables: Vec<TableEntry>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ledger_table: "history".to_string(),
            node_column: DEFAULT_NODE_COLUMN.to_string(),
            default_node_name: DEFAULT_NODE_NAME.to_string(),
            tracked_tables: DEFAULT_TRACKED_TABLES.iter().map(|&t| t.into()).collect(),
            node_partitioned_tables: DEFAULT_NODE_PARTITIONED_TABLES
                .iter()
                .map(|&t| t.into())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TopologyConfig {
    pub mode: TopologyMode,
    /// Overrides the node name reported by the replication extension.
    pub node_name: Option<String>,
    pub extension: String,
    pub node_name_function: String,
    pub replicate_function: String,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            mode: TopologyMode::Auto,
            node_name: None,
            extension: "bdr".to_string(),
            node_name_function: "bdr.bdr_get_local_node_name".to_string(),
            replicate_function: "bdr.bdr_replicate_ddl_command".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub node_table: String,
    pub address_key: String,
    pub artifact_table: String,
    pub artifact_kind: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_table: "system_parameters".to_string(),
            address_key: "centralServerAddress".to_string(),
            artifact_table: "distributed_files".to_string(),
            artifact_kind: "PRIVATE-PARAMETERS".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Upper bound on `nextval` draws for one sequence in one pass.
    pub max_draws_per_sequence: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_draws_per_sequence: 10_000_000,
        }
    }
}

impl Config {
    /// Default config file location: `~/.change-ledger/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".change-ledger").join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default path is used if
    /// present, otherwise built-in defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => {
                    tracing::debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration")
    }

    /// Database URL with `override_url` (CLI/env) taking precedence.
    pub fn database_url(&self, override_url: Option<&str>) -> Result<String> {
        override_url
            .map(str::to_string)
            .or_else(|| self.database.url.clone())
            .context("No database URL: pass --database-url, set CHANGE_LEDGER_DATABASE_URL or set database.url in the config file")
    }
}
