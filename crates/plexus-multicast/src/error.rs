//! Error types for the multicast protocol

use plexus_log::LogError;
use plexus_membership::{MembershipError, NodeId};
use plexus_tree::TreeError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum MulticastError {
    /// Membership lookup failed.
    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// Tree construction or repair failed.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Log or recovery failure.
    #[error(transparent)]
    Log(#[from] LogError),

    /// This node is missing from the multicast tree.
    #[error("node {0} not present in multicast tree")]
    NotInTree(NodeId),

    /// Every child send failed; the write did not propagate from here.
    #[error("multicast failed to all {total} children")]
    AllChildrenFailed {
        /// Number of children attempted.
        total: usize,
    },

    /// One child stayed unreachable through the whole retry budget.
    #[error("child at {address} unreachable after retries")]
    ChildUnreachable {
        /// Address of the unreachable child.
        address: String,
    },

    /// The whole-multicast deadline elapsed.
    #[error("multicast deadline elapsed")]
    DeadlineElapsed,

    /// The local log is still behind after a recovery round; the sender
    /// should retry the multicast once the cluster converges.
    #[error("log out of sync: expected to be at {expected}, at {actual}")]
    OutOfSync {
        /// Required predecessor id.
        expected: i64,
        /// Actual local last id.
        actual: i64,
    },
}
