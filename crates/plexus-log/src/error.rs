//! Error types for the write log and recovery protocol

use plexus_membership::MembershipError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum LogError {
    /// Storage error from the local database.
    #[error("storage error: {0}")]
    Storage(#[from] libsql::Error),

    /// Leader request failed at the transport level.
    #[error("leader request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Membership lookup failed while resolving the leader.
    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// The contacted node refused to serve logs (it is not the leader).
    #[error("node at {address} is not the leader (status {status})")]
    NotLeader {
        /// Address of the refusing node.
        address: String,
        /// HTTP status it answered with.
        status: reqwest::StatusCode,
    },

    /// The leader answered with an unexpected status.
    #[error("leader returned status {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    /// A statement carried a query type the log does not know.
    #[error("unknown query type: {0}")]
    UnknownQueryType(String),

    /// The log is still behind after a recovery round.
    #[error("log still behind after recovery: expected id {expected}, have {actual}")]
    StillBehind {
        /// The id the log needed to reach.
        expected: i64,
        /// The id it actually reached.
        actual: i64,
    },

    /// Retries were exhausted while fetching entries.
    #[error("log fetch failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: usize,
        /// The error from the final attempt.
        last_error: String,
    },
}
