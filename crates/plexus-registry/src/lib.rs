//! Lease-based membership registry
//!
//! A single process tracking `{node id -> address, lease expiry, leader flag}`.
//! Members register once, then extend their lease with keepalives; a background
//! sweeper removes entries whose lease elapsed. The leader flag is advisory
//! (election is the authority) but held by at most one member at a time.

pub mod error;
pub mod store;

pub use error::RegistryError;
pub use store::LeaseTable;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use plexus_membership::client::{KeepaliveRequest, RegisterRequest, RegisterResponse};

/// Configuration for the registry service
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Address to serve the registry API on.
    pub listen_addr: SocketAddr,
    /// How long a lease lives without a keepalive.
    pub lease_duration: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7946".parse().unwrap(),
            lease_duration: Duration::from_secs(6),
        }
    }
}

/// The membership registry service
pub struct RegistryService {
    config: RegistryConfig,
    store: Arc<LeaseTable>,
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl RegistryService {
    /// Create a new registry service
    pub fn new(config: RegistryConfig) -> Self {
        let store = Arc::new(LeaseTable::new(config.lease_duration));

        Self {
            config,
            store,
            cancellation_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// The lease table backing this service
    pub fn store(&self) -> &Arc<LeaseTable> {
        &self.store
    }

    /// Start the HTTP listener and the lease sweeper.
    ///
    /// Returns the bound address (useful when the configured port is 0).
    pub async fn start(&self) -> Result<SocketAddr, RegistryError> {
        if self.task_tracker.is_closed() {
            return Err(RegistryError::AlreadyStarted);
        }

        let listener = tokio::net::TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(RegistryError::Bind)?;
        let local_addr = listener.local_addr().map_err(RegistryError::Bind)?;
        info!("membership registry listening on {}", local_addr);

        let router = router(self.store.clone());
        let serve_token = self.cancellation_token.clone();
        self.task_tracker.spawn(async move {
            tokio::select! {
                result = axum::serve(listener, router.into_make_service()) => {
                    info!("registry http server exited: {:?}", result);
                }
                _ = serve_token.cancelled() => {}
            }
        });

        // Sweep well inside the lease window so an expired entry never
        // outlives lease_duration / 2.
        let sweep_interval = self.config.lease_duration / 3;
        let store = self.store.clone();
        let sweep_token = self.cancellation_token.clone();
        self.task_tracker.spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = store.sweep();
                        if !removed.is_empty() {
                            debug!("sweeper removed {} expired members", removed.len());
                        }
                    }
                    _ = sweep_token.cancelled() => break,
                }
            }
        });

        self.task_tracker.close();

        Ok(local_addr)
    }

    /// Stop the service and wait for its tasks to exit
    pub async fn shutdown(&self) {
        info!("membership registry shutting down...");
        self.cancellation_token.cancel();
        self.task_tracker.wait().await;
        info!("membership registry shutdown");
    }
}

/// Build the registry API router over a lease table
pub fn router(store: Arc<LeaseTable>) -> Router {
    Router::new()
        .route("/register", post(register_handler))
        .route("/keepalive", post(keepalive_handler))
        .route("/members", get(members_handler))
        .route("/leader", get(leader_handler))
        .with_state(store)
}

async fn register_handler(
    State(store): State<Arc<LeaseTable>>,
    Json(request): Json<RegisterRequest>,
) -> impl IntoResponse {
    let member = store.register(request.id, request.address);
    Json(RegisterResponse {
        lease_id: member.lease_id,
    })
}

async fn keepalive_handler(
    State(store): State<Arc<LeaseTable>>,
    Json(request): Json<KeepaliveRequest>,
) -> StatusCode {
    store.keepalive(request.id, request.address, request.is_leader);
    StatusCode::OK
}

async fn members_handler(State(store): State<Arc<LeaseTable>>) -> impl IntoResponse {
    Json(store.members())
}

async fn leader_handler(State(store): State<Arc<LeaseTable>>) -> impl IntoResponse {
    match store.leader() {
        Some(leader) => Json(leader).into_response(),
        None => (StatusCode::NOT_FOUND, "no leader").into_response(),
    }
}
