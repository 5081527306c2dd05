//! Errors raised while talking to the cluster through kubectl.

use thiserror::Error;

/// Result type alias for kubectl operations.
pub type Result<T> = std::result::Result<T, KubectlError>;

/// Markers kubectl prints when no cluster is reachable.
const CLUSTER_UNREACHABLE_MARKERS: &[&str] = &[
    "connection refused",
    "no configuration has been provided",
    "dial tcp",
    "unable to connect to the server",
    "no such host",
];

#[derive(Error, Debug)]
pub enum KubectlError {
    #[error("kubectl not found in PATH or well-known locations")]
    KubectlNotFound,

    #[error("kubectl command failed: {0}")]
    CommandFailed(String),

    #[error("Cluster not reachable: {0}")]
    ClusterNotConnected(String),

    #[error("kubectl command timed out")]
    Timeout,

    #[error("Failed to parse kubectl output: {0}")]
    ParsingFailed(String),

    #[error("Process error: {0}")]
    ProcessError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KubectlError {
    /// Classifies kubectl stderr output.
    pub fn from_kubectl_error(stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        let lower = message.to_lowercase();

        if CLUSTER_UNREACHABLE_MARKERS
            .iter()
            .any(|marker| lower.contains(marker))
        {
            KubectlError::ClusterNotConnected(message)
        } else {
            KubectlError::CommandFailed(message)
        }
    }

    pub fn is_cluster_not_connected(&self) -> bool {
        matches!(self, KubectlError::ClusterNotConnected(_))
    }
}
