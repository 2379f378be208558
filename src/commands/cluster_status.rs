// ABOUTME: cluster-status command - one line per node with address and last distribution
// ABOUTME: Optional JSON output for dashboards

use anyhow::Result;

use crate::config::Config;
use crate::store::Store;

pub async fn cluster_status(store: &Store, config: &Config, json: bool) -> Result<()> {
    let nodes = store.cluster_status(config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
        return Ok(());
    }

    if nodes.is_empty() {
        println!("No nodes found in {}", config.cluster.node_table);
        return Ok(());
    }

    println!("{:<20} {:<40} LAST DISTRIBUTED", "NODE", "ADDRESS");
    for node in &nodes {
        let address = node.address.as_deref().unwrap_or("-");
        let distributed = node
            .last_distributed_at
            .map(|at| at.to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("{:<20} {:<40} {}", node.node_name, address, distributed);
    }
    Ok(())
}
