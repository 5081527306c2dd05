//! Domain layer - Pure business logic and data models.
//!
//! This module contains domain entities that represent core business concepts.
//! These types have no I/O dependencies and can be tested in isolation.

mod endpoint;
mod entry;
mod selector;

// Re-export all domain types
pub use endpoint::{ForwardableEndpoint, ResourceKind};
pub use entry::{EntryStatus, ForwardEntry};
pub use selector::LabelSelector;
