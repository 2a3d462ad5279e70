//! Election state and transition rules
//!
//! All protocol decisions live here as synchronous methods over plain state,
//! so the voting rules are testable without sockets or timers.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use plexus_membership::NodeId;

/// Outcome of a vote request against local state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteDecision {
    /// Whether the vote was granted.
    pub granted: bool,
    /// The local term after handling the request.
    pub term: u64,
}

/// Per-node election state.
///
/// Invariants: `is_leader` implies `last_known_leader == Some(self)`; the
/// term never decreases; at most one vote is granted per term.
#[derive(Debug)]
pub struct ElectionState {
    node_id: NodeId,
    /// Current election term.
    pub term: u64,
    /// The node believed to be leader, if any.
    pub last_known_leader: Option<NodeId>,
    /// Whether this node currently holds leadership.
    pub is_leader: bool,
    /// Ids present in the latest membership snapshot.
    pub active_nodes: BTreeSet<NodeId>,
    /// Votes gathered this term (candidate side).
    pub votes: BTreeSet<NodeId>,
    /// Term in which this node last granted a vote (voter side).
    voted_in_term: Option<u64>,
}

impl ElectionState {
    /// Fresh follower state for `node_id`
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            term: 0,
            last_known_leader: None,
            is_leader: false,
            active_nodes: BTreeSet::new(),
            votes: BTreeSet::new(),
            voted_in_term: None,
        }
    }

    /// The id this state belongs to
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Strict majority over the active set
    pub fn majority(&self) -> usize {
        self.active_nodes.len() / 2 + 1
    }

    /// Whether any active node has a lower id than ours
    pub fn lower_id_active(&self) -> bool {
        self.active_nodes.iter().any(|id| *id < self.node_id)
    }

    /// Replace the active set from a membership snapshot.
    ///
    /// The registry's advisory leader flag seeds `last_known_leader` so a
    /// freshly started node converges without waiting for a heartbeat.
    pub fn update_active(
        &mut self,
        ids: impl IntoIterator<Item = NodeId>,
        flagged_leader: Option<NodeId>,
    ) {
        self.active_nodes = ids.into_iter().collect();
        if let Some(leader) = flagged_leader {
            self.last_known_leader = Some(leader);
        }
    }

    /// Apply the vote-granting rule for an inbound request.
    ///
    /// Grant iff the term is newer, or it is the current term, the candidate
    /// has a lower id than ours, and we have not voted this term yet.
    pub fn handle_vote_request(&mut self, candidate_id: NodeId, term: u64) -> VoteDecision {
        let newer_term = term > self.term;
        let same_term_lower_id = term == self.term
            && candidate_id < self.node_id
            && self.voted_in_term != Some(term);

        if newer_term || same_term_lower_id {
            self.term = term;
            self.is_leader = false;
            self.last_known_leader = Some(candidate_id);
            self.voted_in_term = Some(term);

            VoteDecision {
                granted: true,
                term: self.term,
            }
        } else {
            VoteDecision {
                granted: false,
                term: self.term,
            }
        }
    }

    /// Apply an inbound leader heartbeat. Returns whether it was accepted.
    pub fn handle_heartbeat(&mut self, term: u64, leader: NodeId) -> bool {
        if term >= self.term {
            self.term = term;
            self.is_leader = leader == self.node_id;
            self.last_known_leader = Some(leader);
            true
        } else {
            false
        }
    }

    /// Enter candidacy: bump the term, clear gathered votes, vote for self.
    /// Returns the campaign term.
    pub fn begin_candidacy(&mut self) -> u64 {
        self.term += 1;
        self.votes = BTreeSet::from([self.node_id]);
        self.voted_in_term = Some(self.term);
        self.term
    }

    /// Record a granted vote for `term`. Returns the number gathered,
    /// or `None` if the campaign term has moved on.
    pub fn record_vote(&mut self, from: NodeId, term: u64) -> Option<usize> {
        if term != self.term {
            return None;
        }
        self.votes.insert(from);
        Some(self.votes.len())
    }

    /// Take leadership of the current term
    pub fn become_leader(&mut self) {
        self.is_leader = true;
        self.last_known_leader = Some(self.node_id);
    }

    /// Re-derive the leader flag from the known leader and quorum presence.
    ///
    /// Below quorum the flag drops, so a minority partition stops accepting
    /// writes even while its old leader is still running.
    pub fn recognize_leader(&mut self) {
        if self.active_nodes.len() < self.majority() {
            self.is_leader = false;
            return;
        }

        if let Some(leader) = self.last_known_leader {
            if self.active_nodes.contains(&leader) {
                self.is_leader = leader == self.node_id;
            }
        }
    }

    /// Adopt a leader discovered out-of-band (startup recovery).
    /// Returns whether the report was newer than local state.
    pub fn adopt_discovered_leader(&mut self, leader: NodeId, term: u64) -> bool {
        if term >= self.term {
            self.term = term;
            self.is_leader = leader == self.node_id;
            self.last_known_leader = Some(leader);
            true
        } else {
            false
        }
    }
}

/// Timestamp of the most recent leader heartbeat (or equivalent event)
#[derive(Debug)]
pub struct HeartbeatClock(RwLock<Instant>);

impl HeartbeatClock {
    /// Create a clock marked as just touched
    pub fn new() -> Self {
        Self(RwLock::new(Instant::now()))
    }

    /// Record a heartbeat now
    pub fn touch(&self) {
        *self.0.write() = Instant::now();
    }

    /// Time since the last recorded heartbeat
    pub fn elapsed(&self) -> Duration {
        self.0.read().elapsed()
    }
}

impl Default for HeartbeatClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: u32, active: &[u32]) -> ElectionState {
        let mut s = ElectionState::new(NodeId::new(id));
        s.update_active(active.iter().map(|&i| NodeId::new(i)), None);
        s
    }

    #[test]
    fn grants_vote_for_newer_term() {
        let mut s = state(1, &[1, 2, 3]);
        let decision = s.handle_vote_request(NodeId::new(2), 1);

        assert!(decision.granted);
        assert_eq!(s.term, 1);
        assert_eq!(s.last_known_leader, Some(NodeId::new(2)));
        assert!(!s.is_leader);
    }

    #[test]
    fn grants_same_term_only_to_lower_id() {
        let mut s = state(3, &[1, 2, 3]);
        s.term = 5;

        assert!(s.handle_vote_request(NodeId::new(1), 5).granted);
        // Higher id than ours at the same term never wins
        let mut s = state(3, &[3, 4]);
        s.term = 5;
        assert!(!s.handle_vote_request(NodeId::new(4), 5).granted);
    }

    #[test]
    fn grants_at_most_one_vote_per_term() {
        let mut s = state(5, &[1, 2, 5]);
        s.term = 2;

        assert!(s.handle_vote_request(NodeId::new(1), 2).granted);
        assert!(!s.handle_vote_request(NodeId::new(2), 2).granted);
    }

    #[test]
    fn rejects_stale_term() {
        let mut s = state(2, &[1, 2]);
        s.term = 4;

        let decision = s.handle_vote_request(NodeId::new(1), 3);
        assert!(!decision.granted);
        assert_eq!(decision.term, 4);
    }

    #[test]
    fn vote_grant_demotes_leader() {
        let mut s = state(2, &[1, 2, 3]);
        s.become_leader();

        assert!(s.handle_vote_request(NodeId::new(1), s.term + 1).granted);
        assert!(!s.is_leader);
    }

    #[test]
    fn heartbeat_adopts_equal_or_higher_term() {
        let mut s = state(2, &[1, 2, 3]);
        s.term = 3;
        s.become_leader();

        assert!(s.handle_heartbeat(3, NodeId::new(1)));
        assert!(!s.is_leader);
        assert_eq!(s.last_known_leader, Some(NodeId::new(1)));

        assert!(!s.handle_heartbeat(2, NodeId::new(3)));
        assert_eq!(s.last_known_leader, Some(NodeId::new(1)));
    }

    #[test]
    fn candidacy_bumps_term_and_self_votes() {
        let mut s = state(1, &[1, 2, 3]);
        let term = s.begin_candidacy();

        assert_eq!(term, 1);
        assert_eq!(s.votes.len(), 1);
        assert!(s.votes.contains(&NodeId::new(1)));

        // Having voted for ourselves, a same-term rival is refused
        assert!(!s.handle_vote_request(NodeId::new(2), term).granted);
    }

    #[test]
    fn majority_is_strict() {
        assert_eq!(state(1, &[1]).majority(), 1);
        assert_eq!(state(1, &[1, 2]).majority(), 2);
        assert_eq!(state(1, &[1, 2, 3]).majority(), 2);
        assert_eq!(state(1, &[1, 2, 3, 4]).majority(), 3);
    }

    #[test]
    fn record_vote_ignores_stale_campaigns() {
        let mut s = state(1, &[1, 2, 3]);
        let term = s.begin_candidacy();

        assert_eq!(s.record_vote(NodeId::new(2), term), Some(2));
        assert_eq!(s.record_vote(NodeId::new(3), term - 1), None);
    }

    #[test]
    fn recognize_leader_follows_known_leader() {
        let mut s = state(1, &[1, 2, 3, 4]);
        s.become_leader();
        s.recognize_leader();
        assert!(s.is_leader);

        // The registry swept us out but kept the others
        let mut s = state(1, &[2, 3, 4]);
        s.last_known_leader = Some(NodeId::new(2));
        s.recognize_leader();
        assert!(!s.is_leader);
    }

    #[test]
    fn empty_membership_demotes_leader() {
        let mut s = state(1, &[1, 2, 3]);
        s.become_leader();

        s.active_nodes.clear();
        s.recognize_leader();
        assert!(!s.is_leader);
    }

    #[test]
    fn single_node_is_quorate_alone() {
        let mut s = state(1, &[1]);
        s.become_leader();
        s.recognize_leader();
        assert!(s.is_leader);
        assert_eq!(s.majority(), 1);
    }

    #[test]
    fn lowest_id_preemption_check() {
        assert!(state(3, &[1, 3]).lower_id_active());
        assert!(!state(1, &[1, 3]).lower_id_active());
    }

    #[test]
    fn registry_leader_flag_seeds_last_known_leader() {
        let mut s = state(3, &[1, 2, 3]);
        s.update_active(
            [NodeId::new(1), NodeId::new(2), NodeId::new(3)],
            Some(NodeId::new(2)),
        );
        assert_eq!(s.last_known_leader, Some(NodeId::new(2)));

        s.recognize_leader();
        assert!(!s.is_leader);
    }

    #[test]
    fn discovered_leader_adopted_only_when_newer() {
        let mut s = state(2, &[1, 2]);
        s.term = 3;

        assert!(s.adopt_discovered_leader(NodeId::new(1), 3));
        assert_eq!(s.last_known_leader, Some(NodeId::new(1)));

        assert!(!s.adopt_discovered_leader(NodeId::new(2), 1));
        assert_eq!(s.last_known_leader, Some(NodeId::new(1)));
    }

    #[test]
    fn heartbeat_clock_tracks_elapsed() {
        let clock = HeartbeatClock::new();
        std::thread::sleep(Duration::from_millis(10));
        assert!(clock.elapsed() >= Duration::from_millis(10));

        clock.touch();
        assert!(clock.elapsed() < Duration::from_millis(10));
    }
}
