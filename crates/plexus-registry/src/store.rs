//! In-memory lease table

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use plexus_membership::{now_ms, Member, NodeId};

/// Tracks registered members and their leases.
///
/// The leader flag is advisory: the table records whatever the node claims,
/// but never allows two members to hold it at once.
#[derive(Debug)]
pub struct LeaseTable {
    members: DashMap<NodeId, Member>,
    lease_duration: Duration,
}

impl LeaseTable {
    /// Create a lease table with the given lease duration
    pub fn new(lease_duration: Duration) -> Self {
        Self {
            members: DashMap::new(),
            lease_duration,
        }
    }

    /// The configured lease duration
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Register a member, handing out a fresh lease.
    ///
    /// A duplicate register refreshes the existing entry in place.
    pub fn register(&self, id: NodeId, address: String) -> Member {
        let expires_at = now_ms() + self.lease_duration.as_millis() as u64;

        let entry = self
            .members
            .entry(id)
            .and_modify(|m| {
                m.address = address.clone();
                m.expires_at = expires_at;
            })
            .or_insert_with(|| {
                info!("member {} registered at {}", id, address);
                Member {
                    id,
                    address,
                    lease_id: Uuid::new_v4().to_string(),
                    expires_at,
                    is_leader: false,
                }
            });

        entry.clone()
    }

    /// Extend a member's lease, recording its leader claim.
    ///
    /// An unknown id is implicitly registered so a member briefly swept for
    /// lease expiry rejoins without a separate register round.
    pub fn keepalive(&self, id: NodeId, address: String, is_leader: bool) -> Member {
        if is_leader {
            self.clear_other_leaders(id);
        }

        let expires_at = now_ms() + self.lease_duration.as_millis() as u64;

        let entry = self
            .members
            .entry(id)
            .and_modify(|m| {
                m.address = address.clone();
                m.expires_at = expires_at;
                m.is_leader = is_leader;
            })
            .or_insert_with(|| {
                info!("member {} implicitly registered by keepalive", id);
                Member {
                    id,
                    address,
                    lease_id: Uuid::new_v4().to_string(),
                    expires_at,
                    is_leader,
                }
            });

        entry.clone()
    }

    /// Snapshot of all live members
    pub fn members(&self) -> HashMap<NodeId, Member> {
        self.members
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// The member currently flagged as leader, if any
    pub fn leader(&self) -> Option<Member> {
        self.members
            .iter()
            .find(|e| e.value().is_leader)
            .map(|e| e.value().clone())
    }

    /// Remove entries whose lease has elapsed, returning the removed ids
    pub fn sweep(&self) -> Vec<NodeId> {
        let now = now_ms();
        let expired: Vec<NodeId> = self
            .members
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| *e.key())
            .collect();

        for id in &expired {
            self.members.remove(id);
            info!("member {} removed (lease expired)", id);
        }

        expired
    }

    fn clear_other_leaders(&self, claimant: NodeId) {
        for mut entry in self.members.iter_mut() {
            if *entry.key() != claimant && entry.value().is_leader {
                debug!(
                    "member {} yields leader flag to {}",
                    entry.key(),
                    claimant
                );
                entry.value_mut().is_leader = false;
            }
        }
    }
}
