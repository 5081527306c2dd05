//! Ports layer - Trait definitions (interfaces).
//!
//! This module defines the interfaces that the application layer uses
//! to interact with external systems. Implementations live in `adapters`
//! and `kubernetes`.

mod allocator;
mod discovery;
mod forwarder;

pub use allocator::PortAllocator;
pub use discovery::EndpointDiscoverer;
pub use forwarder::{EntryForwarder, OnBroken};
