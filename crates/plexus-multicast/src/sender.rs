//! Leader fan-out and follower receive paths

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use plexus_log::{inline_params, LogError, QueryType, RecoveryClient, WriteLog};
use plexus_membership::{MembershipError, MembershipMonitor, NodeId};
use plexus_tree::{SpanTree, TreeError};

use crate::dedup::DedupSet;
use crate::error::MulticastError;
use crate::message::MulticastMessage;

/// Timing and retry configuration for the multicast protocol
#[derive(Debug, Clone)]
pub struct MulticastConfig {
    /// Per-child send retries.
    pub max_retries: usize,
    /// Fixed backoff between retries.
    pub retry_delay: Duration,
    /// Per-send HTTP timeout.
    pub http_timeout: Duration,
    /// Deadline for one whole fan-out.
    pub multicast_timeout: Duration,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            http_timeout: Duration::from_secs(5),
            multicast_timeout: Duration::from_secs(10),
        }
    }
}

/// What happened to an inbound multicast message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// The write was applied and logged.
    Applied,
    /// The message id was already observed; acknowledged, not re-applied.
    Duplicate,
    /// The message originated here; acknowledged, not re-applied.
    FromSelf,
}

/// Routes writes down the spanning tree and applies inbound multicasts
pub struct Multicaster {
    node_id: NodeId,
    config: MulticastConfig,
    monitor: Arc<MembershipMonitor>,
    log: WriteLog,
    recovery: RecoveryClient,
    dedup: Arc<DedupSet>,
    tree: Arc<RwLock<SpanTree>>,
    http: reqwest::Client,
}

impl Multicaster {
    /// Create a multicaster for `node_id`
    pub fn new(
        node_id: NodeId,
        config: MulticastConfig,
        monitor: Arc<MembershipMonitor>,
        log: WriteLog,
        recovery: RecoveryClient,
        dedup: Arc<DedupSet>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .unwrap_or_default();

        Self {
            node_id,
            config,
            monitor,
            log,
            recovery,
            dedup,
            tree: Arc::new(RwLock::new(SpanTree::new())),
            http,
        }
    }

    /// The dedup set shared with this multicaster
    pub fn dedup(&self) -> &Arc<DedupSet> {
        &self.dedup
    }

    /// The local write log
    pub fn log(&self) -> &WriteLog {
        &self.log
    }

    /// Accept a write at the leader: log it, apply it, fan it out.
    ///
    /// Returns the assigned pid and the number of rows affected. The fan-out
    /// runs in the background; followers that miss it self-heal via recovery.
    pub async fn broadcast_write(
        self: &Arc<Self>,
        query: &str,
        args: Vec<serde_json::Value>,
        query_type: QueryType,
        table: &str,
    ) -> Result<(i64, u64), MulticastError> {
        let inlined = inline_params(query, &args);
        let pid = self.log.append(query_type, table, &inlined).await?;

        let rows = self.log.apply(query, &args).await?;

        let message =
            MulticastMessage::new(query, args, pid, query_type, table, self.node_id);
        // Mark as ours so a forwarding loop cannot re-apply it
        self.dedup.observe(&message.message_id);

        info!("write committed as pid {} on node {}, fanning out", pid, self.node_id);
        self.spawn_forward(message);

        Ok((pid, rows))
    }

    /// Apply an inbound multicast message.
    ///
    /// Duplicates and own messages are acknowledged without effect. A gap in
    /// the sequence triggers one recovery round; if the log is still behind
    /// afterwards the message is rejected and the sender retries.
    pub async fn handle_incoming(
        &self,
        message: &MulticastMessage,
    ) -> Result<ReceiveOutcome, MulticastError> {
        if !self.dedup.observe(&message.message_id) {
            debug!("ignoring duplicate message {}", message.message_id);
            return Ok(ReceiveOutcome::Duplicate);
        }

        if message.source_node == self.node_id.to_string() {
            debug!("ignoring message from self");
            return Ok(ReceiveOutcome::FromSelf);
        }

        let last = self.log.last_id().await?;
        if last + 1 != message.pid {
            info!(
                "multicast gap detected on node {}: at {}, incoming pid {}; recovering",
                self.node_id, last, message.pid
            );

            self.recovery
                .recover_for(self.monitor.client(), &self.log, message.pid)
                .await
                .map_err(|e| match e {
                    LogError::StillBehind { expected, actual } => {
                        MulticastError::OutOfSync { expected, actual }
                    }
                    other => MulticastError::Log(other),
                })?;
        }

        self.log.apply(&message.query, &message.args).await?;

        let inlined = inline_params(&message.query, &message.args);
        if let Err(e) = self
            .log
            .append_with_id(message.pid, message.query_type, &message.table, &inlined)
            .await
        {
            // The write itself landed; recovery will restore the log row
            warn!("failed to append log entry for pid {}: {}", message.pid, e);
        }

        debug!(
            "applied multicast pid {} on node {}: {}",
            message.pid, self.node_id, message.query
        );

        Ok(ReceiveOutcome::Applied)
    }

    /// Forward a message to this node's children in the background.
    ///
    /// The parent has already been acknowledged; a failed branch here is
    /// repaired by that branch's own recovery, not by failing upstream.
    pub fn spawn_forward(self: &Arc<Self>, message: MulticastMessage) {
        let multicaster = self.clone();

        tokio::spawn(async move {
            match multicaster.fan_out(&message).await {
                Ok(()) => {}
                Err(MulticastError::NotInTree(id)) => {
                    // Not yet in the membership snapshot others see
                    debug!("skipping fan-out: node {} not in tree", id);
                }
                Err(e) => {
                    warn!("fan-out of pid {} failed: {}", message.pid, e);
                }
            }
        });
    }

    /// Send a message to each direct child, retrying per child.
    ///
    /// Partial failure is tolerated: the fan-out succeeds as long as one
    /// child accepted the message. Failing everything marks this hop failed
    /// so the parent's retry budget can re-drive it.
    pub async fn fan_out(&self, message: &MulticastMessage) -> Result<(), MulticastError> {
        let deadline = Instant::now() + self.config.multicast_timeout;

        self.reconcile_tree().await?;

        let children = {
            let tree = self.tree.read().await;
            match tree.children_of(self.node_id) {
                Ok(children) => children,
                Err(TreeError::NodeNotFound(id)) => {
                    return Err(MulticastError::NotInTree(id))
                }
                Err(e) => return Err(e.into()),
            }
        };

        if children.is_empty() {
            return Ok(());
        }

        let sends = children.iter().map(|child| {
            let address = child.address.clone();
            let child_id = child.id;
            async move {
                let sent = self.send_with_retry(&address, message, deadline).await;
                if let Err(ref e) = sent {
                    warn!("all retries failed for child {}: {}", child_id, e);
                }
                sent
            }
        });

        let results = join_all(sends).await;
        let failed = results.iter().filter(|r| r.is_err()).count();

        if failed == results.len() {
            return Err(MulticastError::AllChildrenFailed {
                total: results.len(),
            });
        }
        if failed > 0 {
            warn!(
                "multicast partially failed ({} of {} children unreachable)",
                failed,
                results.len()
            );
        }

        Ok(())
    }

    /// Rebuild or repair the tree from a fresh membership snapshot
    pub async fn reconcile_tree(&self) -> Result<(), MulticastError> {
        let members = self
            .monitor
            .client()
            .members_with_retry(self.config.max_retries)
            .await?;

        let leader = members
            .values()
            .find(|m| m.is_leader)
            .map(|m| m.id)
            .ok_or(MembershipError::NoLeader)?;

        let mut tree = self.tree.write().await;
        if tree.reconcile(&members, leader)? {
            debug!("multicast tree updated:\n{}", tree.render());
        }

        Ok(())
    }

    /// A read-only snapshot of the current tree (status and tests)
    pub async fn tree_snapshot(&self) -> SpanTree {
        self.tree.read().await.clone()
    }

    async fn send_with_retry(
        &self,
        address: &str,
        message: &MulticastMessage,
        deadline: Instant,
    ) -> Result<(), MulticastError> {
        let url = format!("http://{address}/recvMulticast");

        for attempt in 1..=self.config.max_retries {
            if Instant::now() >= deadline {
                return Err(MulticastError::DeadlineElapsed);
            }

            match self.http.post(&url).json(message).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    warn!(
                        "retry {}: multicast to {} answered {}",
                        attempt,
                        address,
                        response.status()
                    );
                }
                Err(e) => {
                    warn!("retry {}: multicast to {} failed: {}", attempt, address, e);
                }
            }

            tokio::time::sleep(self.config.retry_delay).await;
        }

        Err(MulticastError::ChildUnreachable {
            address: address.to_string(),
        })
    }
}
