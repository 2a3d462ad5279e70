//! Leader election for plexus
//!
//! Raft-style term voting with a deterministic twist: ids are totally
//! ordered and only the lowest-id active node campaigns, so the common case
//! converges in one round. Votes and leader heartbeats travel over a small
//! length-prefixed JSON TCP protocol; liveness comes from the membership
//! registry.

pub mod config;
pub mod error;
pub mod manager;
pub mod messages;
pub mod state;
pub mod transport;

pub use config::ElectionConfig;
pub use error::ElectionError;
pub use manager::{ElectionManager, ElectionView};
pub use messages::PeerMessage;
pub use state::{ElectionState, HeartbeatClock};
pub use transport::{PeerClient, PeerListener};
