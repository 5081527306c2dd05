//! devforward Core Library
//!
//! Forwards the Kubernetes resources of a dev session to local ports.
//! Provides functionality to:
//! - Discover labelled services and expand them into forwardable endpoints
//! - Allocate local ports without collisions across concurrent sessions
//! - Keep one supervised `kubectl port-forward` tunnel per endpoint alive
//! - Manage user configuration (namespaces, extra endpoints, retry policy)
//!
//! # Architecture
//! This library follows hexagonal architecture (ports & adapters):
//! - `domain`: Pure business logic and data models
//! - `ports`: Trait definitions (interfaces)
//! - `adapters`: External system implementations
//! - `application`: Use case services
//! - `kubernetes`: kubectl-backed discovery and tunnels

// Hexagonal architecture layers
pub mod adapters;
pub mod application;
pub mod domain;
pub mod ports;

pub mod config;
pub mod error;
pub mod kubernetes;

// Re-export domain types (primary API)
pub use domain::{EntryStatus, ForwardEntry, ForwardableEndpoint, LabelSelector, ResourceKind};

// Re-export other commonly used types
pub use adapters::LocalPortAllocator;
pub use application::{EntryManager, ResourceForwarder, RetryPolicy};
pub use config::{Config, ConfigStore, RUN_ID_LABEL};
pub use error::{Error, Result};
pub use kubernetes::{KubectlClient, KubectlForwarder, ServiceDiscoverer};
pub use ports::{EndpointDiscoverer, EntryForwarder, PortAllocator};
