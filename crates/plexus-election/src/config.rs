//! Election timing and transport configuration

use std::ops::Range;
use std::time::Duration;

/// Configuration for the election module
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Interval of the scheduling loop and of leader heartbeats.
    pub heartbeat_interval: Duration,
    /// How long without a leader heartbeat before campaigning.
    /// Must be at least twice `heartbeat_interval`.
    pub leader_timeout: Duration,
    /// Window within which a candidate must gather its majority.
    pub vote_window: Duration,
    /// Randomized pre-election sleep to spread concurrent campaigns.
    pub jitter_ms: Range<u64>,
    /// Base port for the vote/heartbeat TCP listener (`base + node id`).
    pub tcp_base_port: u16,
    /// Host to bind the TCP listener on.
    pub tcp_bind_host: String,
    /// Per-peer TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(2),
            leader_timeout: Duration::from_secs(4),
            vote_window: Duration::from_secs(2),
            jitter_ms: 150..300,
            tcp_base_port: 8000,
            tcp_bind_host: "0.0.0.0".to_string(),
            connect_timeout: Duration::from_secs(1),
        }
    }
}
