//! Adapters layer - External system implementations.
//!
//! This module contains implementations of the port traits defined in `ports`
//! that talk to the local host. Cluster-facing adapters live in `kubernetes`.

pub mod allocator;

// Re-export main types for convenience
pub use allocator::{LocalPortAllocator, DEFAULT_SEARCH_SPAN};
