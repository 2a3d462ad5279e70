//! Catch-up protocol against the leader's log

use std::time::Duration;

use tracing::{info, warn};

use plexus_membership::RegistryClient;

use crate::entry::LogEntry;
use crate::error::LogError;
use crate::store::WriteLog;

/// Configuration for the recovery client
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Bounded retry budget for leader lookups and log fetches.
    pub max_retries: usize,
    /// Delay between retry attempts.
    pub retry_delay: Duration,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            http_timeout: Duration::from_secs(5),
        }
    }
}

/// Pulls missing log suffixes from the leader and applies them atomically
#[derive(Debug, Clone)]
pub struct RecoveryClient {
    http: reqwest::Client,
    config: RecoveryConfig,
}

impl RecoveryClient {
    /// Create a recovery client
    pub fn new(config: RecoveryConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .unwrap_or_default();

        Self { http, config }
    }

    /// Fetch all entries with id greater than `after` from the node at `address`
    pub async fn fetch_entries(
        &self,
        address: &str,
        after: i64,
    ) -> Result<Vec<LogEntry>, LogError> {
        let url = format!("http://{address}/logs?last_id={after}");

        let response = self.http.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(LogError::NotLeader {
                address: address.to_string(),
                status: response.status(),
            });
        }
        if !response.status().is_success() {
            return Err(LogError::UnexpectedStatus(response.status()));
        }

        Ok(response.json().await?)
    }

    /// Like [`fetch_entries`](Self::fetch_entries), retrying transient failures
    pub async fn fetch_entries_with_retry(
        &self,
        address: &str,
        after: i64,
    ) -> Result<Vec<LogEntry>, LogError> {
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_retries {
            match self.fetch_entries(address, after).await {
                Ok(entries) => return Ok(entries),
                // A 403 will not fix itself by retrying the same node
                Err(e @ LogError::NotLeader { .. }) => return Err(e),
                Err(e) => {
                    warn!("attempt {}: failed to fetch logs from {}: {}", attempt, address, e);
                    last_error = e.to_string();
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }

        Err(LogError::RetriesExhausted {
            attempts: self.config.max_retries,
            last_error,
        })
    }

    /// Close the gap between the local log and the leader's.
    ///
    /// Resolves the leader through the registry, pulls everything after the
    /// local last id, and applies it in one transaction. Returns the number
    /// of entries applied.
    pub async fn catch_up(
        &self,
        registry: &RegistryClient,
        log: &WriteLog,
    ) -> Result<usize, LogError> {
        let leader = registry.leader_with_retry(self.config.max_retries).await?;
        let after = log.last_id().await?;

        info!("requesting log entries after {} from leader {} at {}", after, leader.id, leader.address);
        let entries = self.fetch_entries_with_retry(&leader.address, after).await?;

        if entries.is_empty() {
            info!("log already caught up with leader {}", leader.id);
            return Ok(0);
        }

        let applied = log.apply_batch(&entries).await?;
        info!("applied {} recovered log entries, log now at {}", applied, log.last_id().await?);
        Ok(applied)
    }

    /// Recover until the log can accept an incoming entry with id `incoming`.
    ///
    /// Pulls the leader's suffix but applies only entries below `incoming`:
    /// the leader has already logged the triggering write, and applying it
    /// here would leave nothing for the triggering message itself. Re-checks
    /// contiguity afterwards; the caller rejects the message if the log is
    /// still behind.
    pub async fn recover_for(
        &self,
        registry: &RegistryClient,
        log: &WriteLog,
        incoming: i64,
    ) -> Result<(), LogError> {
        let leader = registry.leader_with_retry(self.config.max_retries).await?;
        let after = log.last_id().await?;

        info!(
            "recovering gap before pid {}: requesting entries after {} from leader {}",
            incoming, after, leader.id
        );
        let mut entries = self.fetch_entries_with_retry(&leader.address, after).await?;
        entries.retain(|e| e.id < incoming);

        if !entries.is_empty() {
            let applied = log.apply_batch(&entries).await?;
            info!("applied {} recovered entries", applied);
        }

        let last = log.last_id().await?;
        if last + 1 != incoming {
            return Err(LogError::StillBehind {
                expected: incoming - 1,
                actual: last,
            });
        }

        Ok(())
    }
}
