//! Application layer - Use case services.
//!
//! This module contains the services that orchestrate domain logic and
//! adapter interactions:
//! - [`EntryManager`] owns the registry, the port ledger and the tunnel
//!   capability, and is shared by every session
//! - [`ResourceForwarder`] drives one dev session: discovery, resolution
//!   and one supervision task per entry
//!
//! Services depend on ports (traits) only, so every collaborator can be
//! replaced by a test double.

mod entry_manager;
mod ledger;
mod registry;
mod resource_forwarder;
mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use entry_manager::{EntryManager, Resolved};
pub use ledger::PortLedger;
pub use registry::EntryRegistry;
pub use resource_forwarder::ResourceForwarder;
pub use retry::RetryPolicy;
