//! Background membership monitor
//!
//! Polls the registry on an interval and serves reads from a cached snapshot,
//! so hot paths (fan-out, election ticks) never wait on the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::client::RegistryClient;
use crate::error::MembershipError;
use crate::member::{Member, NodeId};

/// Configuration for the membership monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval at which to refresh the membership snapshot.
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Maintains a cached view of cluster membership
pub struct MembershipMonitor {
    node_id: NodeId,
    client: RegistryClient,
    cached: Arc<RwLock<HashMap<NodeId, Member>>>,
    config: MonitorConfig,
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl MembershipMonitor {
    /// Create a new monitor polling the given registry client
    pub fn new(node_id: NodeId, client: RegistryClient, config: MonitorConfig) -> Self {
        Self {
            node_id,
            client,
            cached: Arc::new(RwLock::new(HashMap::new())),
            config,
            cancellation_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// The node this monitor belongs to
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The underlying registry client
    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// Start the background poll loop after one initial refresh
    pub async fn start(&self) -> Result<(), MembershipError> {
        info!("starting membership monitor for node {}", self.node_id);

        self.refresh().await?;

        let client = self.client.clone();
        let cached = self.cached.clone();
        let poll_interval = self.config.poll_interval;
        let token = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match client.members().await {
                            Ok(members) => {
                                debug!("membership refresh: {} members", members.len());
                                *cached.write().await = members;
                            }
                            Err(e) => {
                                warn!("failed to refresh membership: {}", e);
                            }
                        }
                    }
                    _ = token.cancelled() => {
                        info!("membership monitor stopped");
                        break;
                    }
                }
            }
        });
        self.task_tracker.close();

        Ok(())
    }

    /// Stop the poll loop and wait for it to exit
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.task_tracker.wait().await;
    }

    /// Force an immediate refresh of the cached snapshot
    pub async fn refresh(&self) -> Result<(), MembershipError> {
        let members = self.client.members().await?;
        debug!("membership refresh: {} members", members.len());
        *self.cached.write().await = members;
        Ok(())
    }

    /// The cached membership snapshot
    pub async fn snapshot(&self) -> HashMap<NodeId, Member> {
        self.cached.read().await.clone()
    }

    /// Ids of all members in the cached snapshot, ascending
    pub async fn active_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.cached.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// The member currently flagged as leader in the cached snapshot
    pub async fn current_leader(&self) -> Option<Member> {
        self.cached
            .read()
            .await
            .values()
            .find(|m| m.is_leader)
            .cloned()
    }

    /// Look up a member by id in the cached snapshot
    pub async fn member(&self, id: NodeId) -> Option<Member> {
        self.cached.read().await.get(&id).cloned()
    }
}
