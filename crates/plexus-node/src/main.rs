//! Replica node binary

use tracing::info;
use tracing_subscriber::EnvFilter;

use plexus_node::{Node, NodeConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = NodeConfig::from_env()?;
    info!(
        "starting node {} (registry {}, store {})",
        config.node_id,
        config.membership_host,
        config.db_path.display()
    );

    let node = Node::new(config).await?;
    node.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    node.shutdown().await;

    Ok(())
}
