//! Cluster membership for plexus
//!
//! This crate provides:
//! - Node identity types (`NodeId`, `Member`)
//! - An HTTP client for the membership registry
//! - A background monitor holding a cached membership snapshot

pub mod client;
pub mod error;
pub mod member;
pub mod monitor;

pub use client::RegistryClient;
pub use error::MembershipError;
pub use member::{Member, NodeId, now_ms};
pub use monitor::{MembershipMonitor, MonitorConfig};
