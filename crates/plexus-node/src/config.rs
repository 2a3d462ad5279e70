//! Node configuration from the environment

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use plexus_election::ElectionConfig;
use plexus_log::RecoveryConfig;
use plexus_membership::{MonitorConfig, NodeId};
use plexus_multicast::MulticastConfig;

use crate::error::NodeError;

/// Full configuration of one replica node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's id (`NODE_ID`).
    pub node_id: NodeId,
    /// `host:port` of the membership registry (`MEMBERSHIP_HOST`).
    pub membership_host: String,
    /// Path of the local state store (`DB_PATH`).
    pub db_path: PathBuf,
    /// Address to serve the node HTTP API on.
    pub http_listen: SocketAddr,
    /// Address other nodes reach this node's HTTP API at.
    pub advertise_addr: String,
    /// Pause between registration and leader discovery, so the first
    /// membership poll lands before any election decision.
    pub startup_grace: Duration,
    /// Interval of registry keepalives.
    pub keepalive_interval: Duration,
    /// How long observed message ids are retained.
    pub dedup_retention: Duration,
    /// Interval of dedup pruning.
    pub dedup_prune_interval: Duration,
    /// Membership monitor settings.
    pub monitor: MonitorConfig,
    /// Election settings.
    pub election: ElectionConfig,
    /// Multicast settings.
    pub multicast: MulticastConfig,
    /// Recovery settings.
    pub recovery: RecoveryConfig,
}

impl NodeConfig {
    /// Defaults for `node_id` reaching the registry at `membership_host`
    pub fn new(node_id: NodeId, membership_host: impl Into<String>) -> Self {
        Self {
            node_id,
            membership_host: membership_host.into(),
            db_path: PathBuf::from(format!("plexus-node-{node_id}.db")),
            http_listen: "0.0.0.0:8080".parse().unwrap(),
            advertise_addr: format!("node-{node_id}:8080"),
            startup_grace: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(2),
            dedup_retention: Duration::from_secs(600),
            dedup_prune_interval: Duration::from_secs(60),
            monitor: MonitorConfig::default(),
            election: ElectionConfig::default(),
            multicast: MulticastConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }

    /// Build a configuration from `NODE_ID`, `MEMBERSHIP_HOST`, and `DB_PATH`
    pub fn from_env() -> Result<Self, NodeError> {
        let node_id_raw =
            std::env::var("NODE_ID").map_err(|_| NodeError::MissingEnv("NODE_ID"))?;
        let node_id: NodeId = node_id_raw.parse().map_err(|_| NodeError::InvalidEnv {
            name: "NODE_ID",
            value: node_id_raw.clone(),
        })?;

        let membership_host = std::env::var("MEMBERSHIP_HOST")
            .map_err(|_| NodeError::MissingEnv("MEMBERSHIP_HOST"))?;

        let mut config = Self::new(node_id, membership_host);
        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        Ok(config)
    }
}
