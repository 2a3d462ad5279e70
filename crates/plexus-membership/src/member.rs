//! Node identity and membership entry types

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Stable identifier of a replica.
///
/// Ids are small positive integers; their total order is the sole tiebreaker
/// during leader elections.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Create a new node id
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw integer value
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>().map(NodeId)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        NodeId(id)
    }
}

/// A registered member of the cluster as tracked by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// The node id of the member.
    pub id: NodeId,

    /// The HTTP address (`host:port`) of the member.
    pub address: String,

    /// Opaque lease identifier handed out at registration.
    pub lease_id: String,

    /// When the lease expires (ms since UNIX_EPOCH).
    pub expires_at: u64,

    /// Whether the member currently claims leadership.
    pub is_leader: bool,
}

impl Member {
    /// Whether the member's lease has elapsed at `now_ms`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at < now_ms
    }

    /// Host portion of the member address
    pub fn host(&self) -> &str {
        self.address.split(':').next().unwrap_or(&self.address)
    }
}

/// Get current timestamp in milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_orders_numerically() {
        assert!(NodeId::new(2) < NodeId::new(10));
        assert_eq!("7".parse::<NodeId>().unwrap(), NodeId::new(7));
    }

    #[test]
    fn member_expiry() {
        let member = Member {
            id: NodeId::new(1),
            address: "node-1:8080".to_string(),
            lease_id: "lease".to_string(),
            expires_at: 1_000,
            is_leader: false,
        };
        assert!(!member.is_expired(999));
        assert!(member.is_expired(1_001));
    }

    #[test]
    fn member_host_strips_port() {
        let member = Member {
            id: NodeId::new(3),
            address: "node-3:8080".to_string(),
            lease_id: "lease".to_string(),
            expires_at: 0,
            is_leader: false,
        };
        assert_eq!(member.host(), "node-3");
    }
}
