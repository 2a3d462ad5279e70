//! Error types for the registry service

use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to bind the listen address.
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),

    /// The service was started twice.
    #[error("registry already started")]
    AlreadyStarted,
}
