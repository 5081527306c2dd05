//! Error types for the devforward-core library.

use thiserror::Error;

use crate::kubernetes::errors::KubectlError;

/// Result type alias for devforward operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while discovering, allocating and forwarding endpoints.
#[derive(Error, Debug)]
pub enum Error {
    /// The cluster resource store could not be queried.
    #[error("Discovery failed in namespace '{namespace}': {source}")]
    Discovery {
        namespace: String,
        #[source]
        source: KubectlError,
    },

    /// No free local port was found for an endpoint.
    #[error("No local port available for {key} (preferred {preferred})")]
    PortExhausted { key: String, preferred: u16 },

    /// A tunnel could not be established or dropped unexpectedly.
    #[error("Tunnel for {key} failed: {reason}")]
    Tunnel { key: String, reason: String },

    /// Tearing down a tunnel failed.
    #[error("Failed to terminate tunnel for {key}: {reason}")]
    Termination { key: String, reason: String },

    /// A label selector could not be parsed.
    #[error("Invalid label selector: {0}")]
    InvalidSelector(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kubernetes/kubectl error.
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] KubectlError),
}

impl Error {
    /// Whether this error should abort a whole `start` cycle.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Discovery { .. } | Self::InvalidSelector(_))
    }
}
