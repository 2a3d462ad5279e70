//! Message-id deduplication with time-based eviction

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Set of observed message ids.
///
/// Entries are retained for a fixed window and pruned in the background; the
/// window is far larger than any sender's retry budget, so a retransmitted
/// message is always recognized.
#[derive(Debug)]
pub struct DedupSet {
    seen: DashMap<String, Instant>,
    retention: Duration,
}

impl DedupSet {
    /// Create a set retaining ids for `retention`
    pub fn new(retention: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            retention,
        }
    }

    /// Record `message_id` as observed. Returns `true` if it was new.
    pub fn observe(&self, message_id: &str) -> bool {
        match self.seen.entry(message_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(Instant::now());
                true
            }
        }
    }

    /// Whether `message_id` has been observed within the retention window
    pub fn contains(&self, message_id: &str) -> bool {
        self.seen.contains_key(message_id)
    }

    /// Number of ids currently retained
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Drop entries older than the retention window. Returns how many.
    pub fn prune(&self) -> usize {
        let before = self.seen.len();
        let retention = self.retention;
        self.seen.retain(|_, seen_at| seen_at.elapsed() < retention);
        before - self.seen.len()
    }

    /// Spawn a background task pruning every `interval` until cancelled
    pub fn start_pruner(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let set = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pruned = set.prune();
                        if pruned > 0 {
                            debug!("pruned {} expired message ids", pruned);
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        })
    }
}
