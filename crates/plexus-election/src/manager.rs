//! The election manager: scheduling loop, campaigns, and leader heartbeats

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use plexus_membership::{Member, MembershipMonitor, NodeId};

use crate::config::ElectionConfig;
use crate::error::ElectionError;
use crate::state::{ElectionState, HeartbeatClock};
use crate::transport::{PeerClient, PeerListener};

/// Snapshot of election state for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ElectionView {
    /// This node's id.
    pub node_id: NodeId,
    /// Current term.
    pub term: u64,
    /// Whether this node holds leadership.
    pub is_leader: bool,
    /// The node believed to be leader (0 when unknown).
    pub current_leader: Option<NodeId>,
    /// Ids in the latest membership snapshot.
    pub active_nodes: BTreeSet<NodeId>,
}

/// Runs the election protocol for one node
pub struct ElectionManager {
    node_id: NodeId,
    config: ElectionConfig,
    state: Arc<RwLock<ElectionState>>,
    clock: Arc<HeartbeatClock>,
    monitor: Arc<MembershipMonitor>,
    listener: PeerListener,
    client: PeerClient,
    http: reqwest::Client,
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl ElectionManager {
    /// Create a manager over the given membership monitor
    pub fn new(
        node_id: NodeId,
        config: ElectionConfig,
        monitor: Arc<MembershipMonitor>,
    ) -> Self {
        let state = Arc::new(RwLock::new(ElectionState::new(node_id)));
        let clock = Arc::new(HeartbeatClock::new());
        let listener = PeerListener::new(state.clone(), clock.clone());
        let client = PeerClient::new(config.connect_timeout);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            node_id,
            config,
            state,
            clock,
            monitor,
            listener,
            client,
            http,
            cancellation_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// This node's id
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The TCP port this node's peer listener uses
    pub fn listen_port(&self) -> u16 {
        self.config.tcp_base_port + self.node_id.get() as u16
    }

    /// Whether this node currently holds leadership
    pub async fn is_leader(&self) -> bool {
        self.state.read().await.is_leader
    }

    /// Snapshot for status endpoints
    pub async fn view(&self) -> ElectionView {
        let state = self.state.read().await;
        ElectionView {
            node_id: self.node_id,
            term: state.term,
            is_leader: state.is_leader,
            current_leader: state.last_known_leader,
            active_nodes: state.active_nodes.clone(),
        }
    }

    /// Bind and start the vote/heartbeat listener.
    ///
    /// Separate from the scheduling loop so startup leader discovery can run
    /// between the two.
    pub async fn start_listener(&self) -> Result<(), ElectionError> {
        let bind_addr = format!("{}:{}", self.config.tcp_bind_host, self.listen_port())
            .parse()
            .map_err(|e| {
                ElectionError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
            })?;
        self.listener.start(bind_addr).await?;
        Ok(())
    }

    /// Start the scheduling loop
    pub fn start_scheduler(self: &Arc<Self>) {
        let manager = self.clone();
        let token = self.cancellation_token.clone();
        self.task_tracker.spawn(async move {
            let mut interval = tokio::time::interval(manager.config.heartbeat_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        manager.tick().await;
                    }
                    _ = token.cancelled() => {
                        info!("election loop stopped");
                        break;
                    }
                }
            }
        });
        self.task_tracker.close();
    }

    /// Stop the scheduling loop and the peer listener
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.task_tracker.wait().await;
        self.listener.shutdown().await;
    }

    /// One pass of the scheduling loop
    pub async fn tick(&self) {
        self.refresh_active().await;

        let leader_alive = self.clock.elapsed() < self.config.leader_timeout;
        if leader_alive {
            self.state.write().await.recognize_leader();
        } else {
            self.run_election().await;
        }

        if self.is_leader().await {
            self.send_heartbeats().await;
        }
    }

    /// Pull the cached membership snapshot into election state
    async fn refresh_active(&self) {
        let snapshot = self.monitor.snapshot().await;
        let flagged = snapshot.values().find(|m| m.is_leader).map(|m| m.id);
        let ids: Vec<NodeId> = snapshot.keys().copied().collect();

        self.state.write().await.update_active(ids, flagged);
    }

    /// On startup, ask peers for the current leader before campaigning.
    ///
    /// Adopting an existing leader avoids a needless term bump every time a
    /// node restarts. Returns whether a leader was found.
    pub async fn discover_existing_leader(&self) -> bool {
        self.refresh_active().await;

        let peers: Vec<Member> = {
            let active = self.state.read().await.active_nodes.clone();
            let mut members = Vec::new();
            for id in active {
                if id == self.node_id {
                    continue;
                }
                if let Some(member) = self.monitor.member(id).await {
                    members.push(member);
                }
            }
            members
        };

        for peer in peers {
            if !self.client.ping(&self.peer_tcp_addr(&peer)).await {
                continue;
            }

            match self.ask_for_leader(&peer.address).await {
                Ok(Some((leader, term))) => {
                    let adopted = self
                        .state
                        .write()
                        .await
                        .adopt_discovered_leader(leader, term);
                    if adopted {
                        self.clock.touch();
                    }
                    info!(
                        "discovered existing leader: node {} (term {}) via {}",
                        leader, term, peer.id
                    );
                    return true;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("leader query to {} failed: {}", peer.id, e);
                }
            }
        }

        false
    }

    async fn ask_for_leader(
        &self,
        address: &str,
    ) -> Result<Option<(NodeId, u64)>, reqwest::Error> {
        let body = self
            .http
            .get(format!("http://{address}/leader"))
            .send()
            .await?
            .text()
            .await?;

        Ok(parse_leader_line(&body))
    }

    /// Campaign for leadership of the next term.
    ///
    /// Aborts when a known leader is still active, a heartbeat arrived during
    /// the jitter sleep, or a lower-id node should campaign instead.
    pub async fn run_election(&self) {
        let jitter = {
            let mut rng = rand::thread_rng();
            Duration::from_millis(rng.gen_range(self.config.jitter_ms.clone()))
        };
        tokio::time::sleep(jitter).await;

        let (term, peers) = {
            let mut state = self.state.write().await;

            if let Some(leader) = state.last_known_leader {
                if leader != self.node_id && state.active_nodes.contains(&leader) {
                    debug!("election aborted: leader {} still in membership", leader);
                    return;
                }
            }

            if self.clock.elapsed() < self.config.leader_timeout {
                debug!("election aborted: heartbeat arrived during jitter");
                return;
            }

            if state.lower_id_active() {
                debug!("election aborted: lower-id node active");
                return;
            }

            let term = state.begin_candidacy();
            let peers: Vec<NodeId> = state
                .active_nodes
                .iter()
                .copied()
                .filter(|id| *id != self.node_id)
                .collect();
            (term, peers)
        };

        info!("node {} campaigning for term {}", self.node_id, term);

        let (vote_tx, mut vote_rx) = mpsc::unbounded_channel::<NodeId>();
        for peer in peers {
            let Some(member) = self.monitor.member(peer).await else {
                continue;
            };
            let addr = self.peer_tcp_addr(&member);
            let client = self.client.clone();
            let node_id = self.node_id;
            let vote_tx = vote_tx.clone();

            tokio::spawn(async move {
                match client.request_vote(&addr, node_id, term).await {
                    Ok(true) => {
                        let _ = vote_tx.send(peer);
                    }
                    Ok(false) => {
                        debug!("vote denied by {}", peer);
                    }
                    Err(e) => {
                        debug!("vote request to {} failed: {}", peer, e);
                    }
                }
            });
        }
        drop(vote_tx);

        let deadline = tokio::time::Instant::now() + self.config.vote_window;
        loop {
            let granted = tokio::select! {
                vote = vote_rx.recv() => vote,
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("vote window for term {} closed", term);
                    break;
                }
            };

            let Some(voter) = granted else {
                break;
            };

            let mut state = self.state.write().await;
            let Some(gathered) = state.record_vote(voter, term) else {
                // A newer term arrived mid-campaign; stand down
                debug!("campaign for term {} superseded by term {}", term, state.term);
                return;
            };

            if gathered >= state.majority() && !state.is_leader {
                state.become_leader();
                drop(state);
                self.clock.touch();
                info!("node {} won election for term {}", self.node_id, term);
                return;
            }
        }

        // Single-node clusters carry their own majority
        let mut state = self.state.write().await;
        if state.term == term && state.votes.len() >= state.majority() && !state.is_leader {
            state.become_leader();
            drop(state);
            self.clock.touch();
            info!("node {} won election for term {}", self.node_id, term);
        } else {
            debug!("election for term {} failed to reach majority", term);
        }
    }

    /// Emit a heartbeat to every other active node
    pub async fn send_heartbeats(&self) {
        let (term, peers) = {
            let state = self.state.read().await;
            if !state.is_leader {
                return;
            }
            let peers: Vec<NodeId> = state
                .active_nodes
                .iter()
                .copied()
                .filter(|id| *id != self.node_id)
                .collect();
            (state.term, peers)
        };

        // Our own liveness counts as hearing from the leader
        self.clock.touch();

        for peer in peers {
            let Some(member) = self.monitor.member(peer).await else {
                continue;
            };
            let addr = self.peer_tcp_addr(&member);
            let client = self.client.clone();
            let node_id = self.node_id;

            tokio::spawn(async move {
                if let Err(e) = client.send_heartbeat(&addr, term, node_id).await {
                    warn!("heartbeat to {} failed: {}", peer, e);
                } else {
                    debug!("sent heartbeat to {} (term {})", peer, term);
                }
            });
        }
    }

    /// Derive a member's vote/heartbeat TCP address from its HTTP address
    fn peer_tcp_addr(&self, member: &Member) -> String {
        format!(
            "{}:{}",
            member.host(),
            self.config.tcp_base_port + member.id.get() as u16
        )
    }
}

/// Parse `Current leader: Node X (Term: Y)` (term optional)
pub fn parse_leader_line(line: &str) -> Option<(NodeId, u64)> {
    let rest = line.trim().strip_prefix("Current leader: Node ")?;

    let (id_part, term_part) = match rest.split_once(" (Term: ") {
        Some((id, term)) => (id, Some(term.trim_end_matches(')'))),
        None => (rest, None),
    };

    let id: u32 = id_part.trim().parse().ok()?;
    if id == 0 {
        return None;
    }

    let term = match term_part {
        Some(t) => t.trim().parse().ok()?,
        None => 0,
    };

    Some((NodeId::new(id), term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_leader_line_with_term() {
        assert_eq!(
            parse_leader_line("Current leader: Node 2 (Term: 7)\n"),
            Some((NodeId::new(2), 7))
        );
    }

    #[test]
    fn parses_leader_line_without_term() {
        assert_eq!(
            parse_leader_line("Current leader: Node 4"),
            Some((NodeId::new(4), 0))
        );
    }

    #[test]
    fn rejects_unknown_leader_line() {
        assert_eq!(parse_leader_line("Current leader: Node 0 (Term: 0)"), None);
        assert_eq!(parse_leader_line("no leader"), None);
    }
}
