//! Spanning-tree multicast of writes
//!
//! The leader fans each accepted write out along the multicast tree; every
//! follower applies, acks its parent, then forwards to its own children.
//! Message ids plus a time-evicted dedup set give at-most-once delivery
//! under retransmission, and an out-of-order sequence number triggers log
//! recovery before the write is accepted.

pub mod dedup;
pub mod error;
pub mod message;
pub mod sender;

pub use dedup::DedupSet;
pub use error::MulticastError;
pub use message::MulticastMessage;
pub use sender::{Multicaster, MulticastConfig, ReceiveOutcome};
