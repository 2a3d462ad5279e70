//! Wire messages for the vote/heartbeat TCP protocol

use serde::{Deserialize, Serialize};

use plexus_membership::NodeId;

/// A JSON-framed message exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// A candidate asking for this term's vote.
    VoteRequest {
        /// Id of the campaigning node.
        candidate_id: NodeId,
        /// Term the candidate is campaigning in.
        term: u64,
    },
    /// Answer to a vote request.
    VoteResponse {
        /// Whether the vote was granted.
        vote_granted: bool,
        /// The responder's current term.
        term: u64,
    },
    /// Periodic liveness signal from the leader.
    Heartbeat {
        /// The leader's term.
        term: u64,
        /// The leader's id.
        leader: NodeId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_tagged_json() {
        let msg = PeerMessage::VoteRequest {
            candidate_id: NodeId::new(2),
            term: 7,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"vote_request\""));

        let back: PeerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn heartbeat_round_trips() {
        let msg = PeerMessage::Heartbeat {
            term: 3,
            leader: NodeId::new(1),
        };
        let back: PeerMessage =
            serde_json::from_slice(&serde_json::to_vec(&msg).unwrap()).unwrap();
        assert_eq!(back, msg);
    }
}
