//! Port allocator port (interface).

use std::collections::HashSet;

/// Port for choosing a local port.
///
/// Implementations are pure policy over their explicit inputs. They never
/// claim the port they return: the caller claims it in the same critical
/// section as the call (see [`PortLedger::claim_with`]).
///
/// [`PortLedger::claim_with`]: crate::application::PortLedger::claim_with
pub trait PortAllocator: Send + Sync {
    /// Picks a local port, trying `preferred` first.
    ///
    /// Returns `None` when every candidate is claimed or unusable.
    fn allocate(&self, preferred: u16, claimed: &HashSet<u16>) -> Option<u16>;
}
