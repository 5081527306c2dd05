//! Shared coordinator for forwarding entries.
//!
//! Owns the entry registry, the port ledger, the notice sink and the tunnel
//! capability. Every resource forwarder in a session goes through one
//! `EntryManager`, which is what keeps one entry per canonical key and one
//! live entry per local port.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ledger::PortLedger;
use super::registry::EntryRegistry;
use crate::domain::{EntryStatus, ForwardEntry, ForwardableEndpoint};
use crate::error::{Error, Result};
use crate::ports::{EntryForwarder, OnBroken, PortAllocator};

/// Outcome of [`EntryManager::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub entry: Arc<ForwardEntry>,
    /// `false` when an existing entry was reused.
    pub created: bool,
}

/// Coordinates entry resolution, tunnel lifecycle and port bookkeeping.
pub struct EntryManager<F: EntryForwarder> {
    registry: EntryRegistry,
    ledger: PortLedger,
    allocator: Box<dyn PortAllocator>,
    forwarder: F,
    notices: Mutex<Box<dyn Write + Send>>,
}

impl<F: EntryForwarder> EntryManager<F> {
    /// Creates a manager writing forwarding notices to `notices`.
    pub fn new<A, W>(forwarder: F, allocator: A, notices: W) -> Self
    where
        A: PortAllocator + 'static,
        W: Write + Send + 'static,
    {
        Self {
            registry: EntryRegistry::new(),
            ledger: PortLedger::new(),
            allocator: Box::new(allocator),
            forwarder,
            notices: Mutex::new(Box::new(notices)),
        }
    }

    pub fn registry(&self) -> &EntryRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &PortLedger {
        &self.ledger
    }

    pub fn forwarder(&self) -> &F {
        &self.forwarder
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    /// Returns the entry for `endpoint`, creating it if the key is new.
    ///
    /// An existing entry is returned unchanged, local port included. A new
    /// entry gets a port from the allocator, claimed in the same critical
    /// section. Nothing is registered when no port is free.
    pub fn resolve(&self, endpoint: &ForwardableEndpoint) -> Result<Resolved> {
        let key = endpoint.key();
        let preferred = endpoint.preferred_local_port();

        let (entry, created) = self.registry.get_or_try_insert_with(&key, || {
            let port = self
                .ledger
                .claim_with(|claimed| self.allocator.allocate(preferred, claimed))
                .ok_or_else(|| Error::PortExhausted {
                    key: key.clone(),
                    preferred,
                })?;
            Ok::<_, Error>(ForwardEntry::new(endpoint.clone(), port))
        })?;

        if created {
            debug!(
                key = %key,
                preferred,
                local_port = entry.local_port(),
                "Allocated local port"
            );
        }

        Ok(Resolved { entry, created })
    }

    /// Terminates `entry` and returns its port and key.
    ///
    /// Returns `false` if the entry was already terminated.
    pub fn release(&self, entry: &ForwardEntry) -> bool {
        if !entry.terminate() {
            return false;
        }

        self.ledger.release(entry.local_port());
        self.registry.delete_instance(entry.key(), entry.id());
        true
    }

    // =========================================================================
    // Tunnel Lifecycle
    // =========================================================================

    /// Opens the tunnel for `entry` and marks it live.
    pub async fn forward_entry(&self, cancel: &CancellationToken, entry: &ForwardEntry) -> Result<()> {
        if entry.is_terminated() {
            return Err(Error::Tunnel {
                key: entry.key().to_string(),
                reason: "entry already terminated".to_string(),
            });
        }

        if let Err(e) = self.forwarder.forward(cancel, entry).await {
            entry.transition(EntryStatus::Broken);
            return Err(e);
        }

        if !entry.transition(EntryStatus::Forwarding) {
            return Err(Error::Tunnel {
                key: entry.key().to_string(),
                reason: "entry terminated while forwarding".to_string(),
            });
        }

        info!(
            key = entry.key(),
            local_port = entry.local_port(),
            remote_port = entry.endpoint().port,
            "Port forward established"
        );
        self.emit_notice(entry);
        Ok(())
    }

    /// Starts supervising a live tunnel.
    pub fn monitor_entry(&self, entry: &ForwardEntry, on_broken: OnBroken) {
        self.forwarder.monitor(entry, on_broken);
    }

    /// Tears down the tunnel and releases the entry.
    ///
    /// The entry is released even when teardown fails; the teardown error
    /// is still returned.
    pub async fn terminate_entry(&self, entry: &ForwardEntry) -> Result<()> {
        let teardown = self.forwarder.terminate(entry).await;

        if self.release(entry) {
            info!(
                key = entry.key(),
                local_port = entry.local_port(),
                "Port forward terminated"
            );
        }

        teardown.map_err(|e| match e {
            Error::Termination { .. } => e,
            other => Error::Termination {
                key: entry.key().to_string(),
                reason: other.to_string(),
            },
        })
    }

    /// Terminates every registered entry.
    pub async fn terminate_all(&self) {
        for entry in self.registry.entries() {
            if let Err(e) = self.terminate_entry(&entry).await {
                warn!(key = entry.key(), error = %e, "Teardown failed, port released anyway");
            }
        }
    }

    fn emit_notice(&self, entry: &ForwardEntry) {
        let endpoint = entry.endpoint();
        let mut notices = self.notices.lock();
        let written = writeln!(
            notices,
            "forwarding {} {} in {}: local port {} → remote port {}",
            endpoint.kind,
            endpoint.name,
            endpoint.namespace,
            entry.local_port(),
            endpoint.port
        )
        .and_then(|_| notices.flush());

        if let Err(e) = written {
            warn!(key = entry.key(), error = %e, "Failed to write forwarding notice");
        }
    }
}
