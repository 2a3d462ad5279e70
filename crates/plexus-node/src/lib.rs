//! Replica node wiring
//!
//! Builds the per-node context (membership monitor, election manager,
//! multicaster, write log) as constructed dependencies, runs the startup
//! sequence, and serves the node HTTP API.

pub mod config;
pub mod error;
pub mod http;

pub use config::NodeConfig;
pub use error::NodeError;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use plexus_election::ElectionManager;
use plexus_log::{RecoveryClient, WriteLog};
use plexus_membership::{MembershipMonitor, RegistryClient};
use plexus_multicast::{DedupSet, Multicaster};

/// One replica of the identity store
pub struct Node {
    config: NodeConfig,
    monitor: Arc<MembershipMonitor>,
    election: Arc<ElectionManager>,
    multicaster: Arc<Multicaster>,
    log: WriteLog,
    recovery: RecoveryClient,
    dedup: Arc<DedupSet>,
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl Node {
    /// Open the local store and build the node's collaborators.
    ///
    /// Failing to open the store is fatal: the process has nothing to
    /// replicate onto.
    pub async fn new(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        let log = WriteLog::open(&config.db_path).await?;

        let client = RegistryClient::new(config.membership_host.clone());
        let monitor = Arc::new(MembershipMonitor::new(
            config.node_id,
            client,
            config.monitor.clone(),
        ));
        let election = Arc::new(ElectionManager::new(
            config.node_id,
            config.election.clone(),
            monitor.clone(),
        ));
        let dedup = Arc::new(DedupSet::new(config.dedup_retention));
        let recovery = RecoveryClient::new(config.recovery.clone());
        let multicaster = Arc::new(Multicaster::new(
            config.node_id,
            config.multicast.clone(),
            monitor.clone(),
            log.clone(),
            recovery.clone(),
            dedup.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            monitor,
            election,
            multicaster,
            log,
            recovery,
            dedup,
            cancellation_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }))
    }

    /// This node's configuration
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The election manager
    pub fn election(&self) -> &Arc<ElectionManager> {
        &self.election
    }

    /// The multicaster
    pub fn multicaster(&self) -> &Arc<Multicaster> {
        &self.multicaster
    }

    /// The local write log
    pub fn log(&self) -> &WriteLog {
        &self.log
    }

    /// The membership monitor
    pub fn monitor(&self) -> &Arc<MembershipMonitor> {
        &self.monitor
    }

    /// Run the startup sequence and serve the node API.
    ///
    /// Registers with the registry (fatal on failure), starts the membership
    /// poll, vote listener, HTTP server, keepalive loop, and dedup pruner,
    /// then hands off to the bootstrap task (grace sleep, leader discovery
    /// or first election, cold-start catch-up). Returns the bound HTTP
    /// address.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, NodeError> {
        let node_id = self.config.node_id;

        self.monitor
            .client()
            .register(node_id, &self.config.advertise_addr)
            .await
            .map_err(NodeError::Registration)?;
        info!("node {} registered as {}", node_id, self.config.advertise_addr);

        self.monitor.start().await?;
        self.election.start_listener().await?;

        let listener = tokio::net::TcpListener::bind(self.config.http_listen)
            .await
            .map_err(NodeError::Bind)?;
        let local_addr = listener.local_addr().map_err(NodeError::Bind)?;
        info!("node {} http api on {}", node_id, local_addr);

        let router = http::router(self.clone());
        let serve_token = self.cancellation_token.clone();
        self.task_tracker.spawn(async move {
            tokio::select! {
                result = axum::serve(listener, router.into_make_service()) => {
                    info!("node http server exited: {:?}", result);
                }
                _ = serve_token.cancelled() => {}
            }
        });

        self.spawn_keepalive_loop();

        let _ = self
            .dedup
            .start_pruner(self.config.dedup_prune_interval, self.cancellation_token.clone());

        let node = self.clone();
        self.task_tracker.spawn(async move {
            node.bootstrap().await;
        });

        self.task_tracker.close();

        Ok(local_addr)
    }

    /// Stop every background task and listener
    pub async fn shutdown(&self) {
        info!("node {} shutting down...", self.config.node_id);
        self.cancellation_token.cancel();
        self.task_tracker.wait().await;
        self.election.shutdown().await;
        self.monitor.shutdown().await;
        info!("node {} shutdown complete", self.config.node_id);
    }

    fn spawn_keepalive_loop(self: &Arc<Self>) {
        let node = self.clone();
        let token = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut interval = tokio::time::interval(node.config.keepalive_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let is_leader = node.election.is_leader().await;
                        if let Err(e) = node
                            .monitor
                            .client()
                            .keepalive(node.config.node_id, &node.config.advertise_addr, is_leader)
                            .await
                        {
                            warn!("keepalive failed: {}", e);
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
    }

    /// Startup decision: adopt a running leader and catch up, or campaign.
    async fn bootstrap(self: Arc<Self>) {
        tokio::time::sleep(self.config.startup_grace).await;

        if self.election.discover_existing_leader().await {
            let view = self.election.view().await;
            if view.current_leader != Some(self.config.node_id) {
                match self.recovery.catch_up(self.monitor.client(), &self.log).await {
                    Ok(0) => info!("log already current with leader"),
                    Ok(applied) => info!("start-up catch-up applied {} entries", applied),
                    Err(e) => warn!("start-up catch-up failed: {}", e),
                }
            }
        } else {
            self.election.run_election().await;
        }

        self.election.start_scheduler();
    }
}
