//! Local port allocator adapter.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, TcpListener};

use tracing::debug;

use crate::ports::PortAllocator;

/// Default number of ports scanned past the preferred one.
pub const DEFAULT_SEARCH_SPAN: u16 = 100;

/// Allocates ports that are unclaimed in the ledger and bindable on this host.
///
/// Candidates are the preferred port followed by up to `search_span` ports
/// above it.
#[derive(Debug, Clone)]
pub struct LocalPortAllocator {
    address: IpAddr,
    search_span: u16,
}

impl LocalPortAllocator {
    /// Creates an allocator probing `127.0.0.1` with the default span.
    pub fn new() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            search_span: DEFAULT_SEARCH_SPAN,
        }
    }

    /// Creates an allocator probing `address`, scanning `search_span` ports.
    pub fn with_options(address: IpAddr, search_span: u16) -> Self {
        Self {
            address,
            search_span,
        }
    }

    /// Ports tried for `preferred`, in order.
    pub fn candidates(&self, preferred: u16) -> impl Iterator<Item = u16> {
        let last = preferred.saturating_add(self.search_span);
        (preferred..=last).filter(|port| *port != 0)
    }

    /// Whether something could listen on `port` right now.
    pub fn is_bindable(&self, port: u16) -> bool {
        TcpListener::bind((self.address, port)).is_ok()
    }
}

impl Default for LocalPortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator for LocalPortAllocator {
    fn allocate(&self, preferred: u16, claimed: &HashSet<u16>) -> Option<u16> {
        let port = self
            .candidates(preferred)
            .filter(|port| !claimed.contains(port))
            .find(|port| self.is_bindable(*port));

        match port {
            Some(port) if port != preferred => {
                debug!(preferred, port, "Preferred port unavailable, using next free port");
            }
            None => debug!(preferred, span = self.search_span, "No free port in range"),
            _ => {}
        }

        port
    }
}
