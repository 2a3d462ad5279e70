//! Membership registry binary

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use plexus_registry::{RegistryConfig, RegistryService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut config = RegistryConfig::default();
    if let Ok(addr) = std::env::var("REGISTRY_ADDR") {
        config.listen_addr = addr.parse()?;
    }
    if let Ok(secs) = std::env::var("LEASE_DURATION_SECS") {
        config.lease_duration = Duration::from_secs(secs.parse()?);
    }

    let service = RegistryService::new(config);
    service.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    service.shutdown().await;

    Ok(())
}
