//! Error types for node startup and serving

use plexus_election::ElectionError;
use plexus_log::LogError;
use plexus_membership::MembershipError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A required environment variable is missing.
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// An environment variable failed to parse.
    #[error("invalid value for {name}: {value}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: String,
    },

    /// Registering with the membership registry failed; the node cannot run.
    #[error("failed to register with membership registry: {0}")]
    Registration(#[source] MembershipError),

    /// Membership operation failed.
    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// The local state store failed to open or operate.
    #[error(transparent)]
    Storage(#[from] LogError),

    /// The election transport failed to start.
    #[error(transparent)]
    Election(#[from] ElectionError),

    /// Failed to bind the HTTP listener.
    #[error("failed to bind http listener: {0}")]
    Bind(std::io::Error),
}
