//! Error types for spanning tree operations

use plexus_membership::NodeId;
use thiserror::Error;

/// Spanning tree errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The leader id is missing from the membership snapshot.
    #[error("leader {0} not present in membership")]
    LeaderNotInMembership(NodeId),

    /// A referenced node is not in the tree.
    #[error("node {0} not found in tree")]
    NodeNotFound(NodeId),

    /// The root (leader) cannot be removed in place; rebuild instead.
    #[error("cannot remove the root node {0}")]
    CannotRemoveRoot(NodeId),
}
