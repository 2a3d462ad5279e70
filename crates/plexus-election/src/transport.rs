//! Length-prefixed JSON transport for votes and heartbeats
//!
//! Each frame is a 4-byte big-endian length followed by a JSON-encoded
//! [`PeerMessage`]. Vote requests are one request/response exchange per
//! connection; heartbeats are fire-and-forget.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::ElectionError;
use crate::messages::PeerMessage;
use crate::state::{ElectionState, HeartbeatClock};

const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Read one frame from the stream
pub async fn read_frame(stream: &mut TcpStream) -> Result<PeerMessage, ElectionError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ElectionError::FrameTooLarge(len));
    }

    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await?;

    Ok(serde_json::from_slice(&data)?)
}

/// Write one frame to the stream
pub async fn write_frame(
    stream: &mut TcpStream,
    message: &PeerMessage,
) -> Result<(), ElectionError> {
    let data = Bytes::from(serde_json::to_vec(message)?);

    stream.write_all(&(data.len() as u32).to_be_bytes()).await?;
    stream.write_all(&data).await?;
    stream.flush().await?;

    Ok(())
}

/// Accepts vote requests and heartbeats from peers
pub struct PeerListener {
    state: Arc<RwLock<ElectionState>>,
    clock: Arc<HeartbeatClock>,
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl PeerListener {
    /// Create a listener over shared election state
    pub fn new(state: Arc<RwLock<ElectionState>>, clock: Arc<HeartbeatClock>) -> Self {
        Self {
            state,
            clock,
            cancellation_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Bind `addr` and start the accept loop. Returns the bound address.
    pub async fn start(&self, addr: SocketAddr) -> Result<SocketAddr, ElectionError> {
        if self.task_tracker.is_closed() {
            return Err(ElectionError::AlreadyStarted);
        }

        let listener = TcpListener::bind(addr).await.map_err(ElectionError::Bind)?;
        let local_addr = listener.local_addr().map_err(ElectionError::Bind)?;
        info!("peer listener on {}", local_addr);

        let state = self.state.clone();
        let clock = self.clock.clone();
        let token = self.cancellation_token.clone();
        let tracker = self.task_tracker.clone();

        self.task_tracker.spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer_addr)) => {
                                let state = state.clone();
                                let clock = clock.clone();
                                tracker.spawn(async move {
                                    if let Err(e) =
                                        handle_connection(stream, state, clock).await
                                    {
                                        debug!("peer connection from {} failed: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                warn!("accept failed: {}", e);
                            }
                        }
                    }
                    _ = token.cancelled() => {
                        info!("peer listener stopped");
                        break;
                    }
                }
            }
        });
        self.task_tracker.close();

        Ok(local_addr)
    }

    /// Stop the accept loop and in-flight connection tasks
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        self.task_tracker.wait().await;
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<RwLock<ElectionState>>,
    clock: Arc<HeartbeatClock>,
) -> Result<(), ElectionError> {
    let message = read_frame(&mut stream).await?;

    match message {
        PeerMessage::VoteRequest { candidate_id, term } => {
            let decision = state.write().await.handle_vote_request(candidate_id, term);
            if decision.granted {
                debug!("granted vote to {} for term {}", candidate_id, term);
                clock.touch();
            }

            write_frame(
                &mut stream,
                &PeerMessage::VoteResponse {
                    vote_granted: decision.granted,
                    term: decision.term,
                },
            )
            .await?;
        }
        PeerMessage::Heartbeat { term, leader } => {
            if state.write().await.handle_heartbeat(term, leader) {
                clock.touch();
            }
        }
        PeerMessage::VoteResponse { .. } => {
            debug!("unsolicited vote response ignored");
        }
    }

    Ok(())
}

/// Client side of the vote/heartbeat protocol
#[derive(Debug, Clone)]
pub struct PeerClient {
    connect_timeout: Duration,
}

impl PeerClient {
    /// Create a client with the given connect timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect(&self, addr: &str) -> Result<TcpStream, ElectionError> {
        timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ElectionError::ConnectTimeout(addr.to_string()))?
            .map_err(ElectionError::Io)
    }

    /// Ask the peer at `addr` for its vote. Returns whether it was granted.
    pub async fn request_vote(
        &self,
        addr: &str,
        candidate_id: plexus_membership::NodeId,
        term: u64,
    ) -> Result<bool, ElectionError> {
        let mut stream = self.connect(addr).await?;

        write_frame(&mut stream, &PeerMessage::VoteRequest { candidate_id, term }).await?;

        match read_frame(&mut stream).await? {
            PeerMessage::VoteResponse { vote_granted, .. } => Ok(vote_granted),
            _ => Ok(false),
        }
    }

    /// Send a leader heartbeat to the peer at `addr`
    pub async fn send_heartbeat(
        &self,
        addr: &str,
        term: u64,
        leader: plexus_membership::NodeId,
    ) -> Result<(), ElectionError> {
        let mut stream = self.connect(addr).await?;
        write_frame(&mut stream, &PeerMessage::Heartbeat { term, leader }).await
    }

    /// Whether a peer listener is reachable at `addr`
    pub async fn ping(&self, addr: &str) -> bool {
        self.connect(addr).await.is_ok()
    }
}
