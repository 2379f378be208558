// ABOUTME: topology command - reports single-node or multi-master mode
// ABOUTME: Prints the node name new rows will be stamped with

use anyhow::Result;

use crate::config::Config;
use crate::node::NodeTagger;
use crate::store::Store;

pub async fn topology(store: &Store, config: &Config, json: bool) -> Result<()> {
    let topology = store.detect_topology(config).await?;
    let tagger = NodeTagger::new(
        &config.capture.node_column,
        &config.capture.default_node_name,
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&topology)?);
        return Ok(());
    }

    println!("Backend:  {}", store.backend());
    println!("Topology: {}", topology);
    println!("New rows are tagged '{}'", tagger.resolve(&topology));
    Ok(())
}
