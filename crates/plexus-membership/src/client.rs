//! HTTP client for the membership registry

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::MembershipError;
use crate::member::{Member, NodeId};

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Body of a `POST /register` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// The node id registering.
    pub id: NodeId,
    /// The node's HTTP address (`host:port`).
    pub address: String,
}

/// Body of a `POST /register` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// The lease handed out for this registration.
    pub lease_id: String,
}

/// Body of a `POST /keepalive` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveRequest {
    /// The node id refreshing its lease.
    pub id: NodeId,
    /// The node's HTTP address (`host:port`).
    pub address: String,
    /// Whether the node currently claims leadership.
    pub is_leader: bool,
}

/// Client for the membership registry HTTP API
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    http: reqwest::Client,
}

impl RegistryClient {
    /// Create a client for the registry at `host:port`
    pub fn new(registry_addr: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            base_url: format!("http://{}", registry_addr.into()),
            http,
        }
    }

    /// Register the node, returning the lease id
    pub async fn register(
        &self,
        id: NodeId,
        address: &str,
    ) -> Result<String, MembershipError> {
        let response = self
            .http
            .post(format!("{}/register", self.base_url))
            .json(&RegisterRequest {
                id,
                address: address.to_string(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MembershipError::UnexpectedStatus(response.status()));
        }

        let body: RegisterResponse = response.json().await?;
        Ok(body.lease_id)
    }

    /// Extend the node's lease, carrying the current leader claim
    pub async fn keepalive(
        &self,
        id: NodeId,
        address: &str,
        is_leader: bool,
    ) -> Result<(), MembershipError> {
        let response = self
            .http
            .post(format!("{}/keepalive", self.base_url))
            .json(&KeepaliveRequest {
                id,
                address: address.to_string(),
                is_leader,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MembershipError::UnexpectedStatus(response.status()));
        }

        Ok(())
    }

    /// Fetch the current membership snapshot
    pub async fn members(&self) -> Result<HashMap<NodeId, Member>, MembershipError> {
        let response = self
            .http
            .get(format!("{}/members", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MembershipError::UnexpectedStatus(response.status()));
        }

        Ok(response.json().await?)
    }

    /// Fetch the member currently flagged as leader, if any
    pub async fn leader(&self) -> Result<Option<Member>, MembershipError> {
        let response = self
            .http
            .get(format!("{}/leader", self.base_url))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(MembershipError::UnexpectedStatus(response.status()));
        }

        Ok(Some(response.json().await?))
    }

    /// Fetch the membership snapshot, retrying transient failures
    pub async fn members_with_retry(
        &self,
        attempts: usize,
    ) -> Result<HashMap<NodeId, Member>, MembershipError> {
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.members().await {
                Ok(members) => return Ok(members),
                Err(e) => {
                    warn!("attempt {}: failed to fetch members: {}", attempt, e);
                    last_error = e.to_string();
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }

        Err(MembershipError::RetriesExhausted {
            attempts,
            last_error,
        })
    }

    /// Resolve the current leader, retrying until one is present or attempts run out
    pub async fn leader_with_retry(&self, attempts: usize) -> Result<Member, MembershipError> {
        let mut last_error = MembershipError::NoLeader.to_string();

        for attempt in 1..=attempts {
            match self.leader().await {
                Ok(Some(leader)) => return Ok(leader),
                Ok(None) => {
                    warn!("attempt {}: no leader in membership yet", attempt);
                    last_error = MembershipError::NoLeader.to_string();
                }
                Err(e) => {
                    warn!("attempt {}: failed to fetch leader: {}", attempt, e);
                    last_error = e.to_string();
                }
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }

        Err(MembershipError::RetriesExhausted {
            attempts,
            last_error,
        })
    }
}
