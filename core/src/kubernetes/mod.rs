//! Kubernetes module for service discovery and port forwarding.
//!
//! This module provides:
//! - Service discovery via kubectl, filtered by the session's run label
//! - Process management for `kubectl port-forward` tunnels
//! - Error classification for kubectl output

pub mod discovery;
pub mod errors;
pub mod models;
pub mod process_manager;

// Re-export commonly used types
pub use discovery::{find_kubectl, KubectlClient, ResourceStore, ServiceDiscoverer};
pub use errors::{KubectlError, Result};
pub use models::KubernetesService;
pub use process_manager::KubectlForwarder;
