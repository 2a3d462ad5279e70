//! Deterministic spanning tree for multicast routing
//!
//! The tree is rooted at the current leader; the remaining members form an
//! AVL tree keyed by node id, attached beneath the root. Construction and
//! repair are deterministic, so every node that applies the same membership
//! deltas against the same leader arrives at an identical tree and therefore
//! agrees on every node's children without any coordination.

pub mod error;
pub mod tree;

pub use error::TreeError;
pub use tree::{SpanTree, TreeNode};
