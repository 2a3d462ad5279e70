//! Error types for membership operations

use thiserror::Error;

/// Membership-related errors
#[derive(Debug, Error)]
pub enum MembershipError {
    /// The registry could not be reached or returned a transport error.
    #[error("registry request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The registry answered with an unexpected status.
    #[error("registry returned status {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    /// No member currently claims leadership.
    #[error("no leader present in membership")]
    NoLeader,

    /// Retries against the registry were exhausted.
    #[error("registry unavailable after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: usize,
        /// The error from the final attempt.
        last_error: String,
    },
}
