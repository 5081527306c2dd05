//! Forwarding entry domain model.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use super::ForwardableEndpoint;

// ============================================================================
// EntryStatus
// ============================================================================

/// Lifecycle of a forwarding entry.
///
/// `Pending -> Forwarding -> {Broken -> Forwarding, Terminated}`. A forward
/// that fails before ever going live moves `Pending -> Broken`. `Terminated`
/// is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryStatus {
    #[default]
    Pending,
    Forwarding,
    Broken,
    Terminated,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Forwarding => "forwarding",
            Self::Broken => "broken",
            Self::Terminated => "terminated",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: EntryStatus) -> bool {
        use EntryStatus::*;
        matches!(
            (self, next),
            (Pending, Forwarding)
                | (Pending, Broken)
                | (Forwarding, Broken)
                | (Broken, Forwarding)
                | (Pending | Forwarding | Broken, Terminated)
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ForwardEntry
// ============================================================================

/// The live local-port binding for one canonical key.
///
/// The local port is fixed at construction. Only the status moves, and only
/// along the edges [`EntryStatus::can_transition_to`] allows.
#[derive(Debug)]
pub struct ForwardEntry {
    id: Uuid,
    key: String,
    endpoint: ForwardableEndpoint,
    local_port: u16,
    status: RwLock<EntryStatus>,
    restarts: AtomicU32,
    went_live: AtomicBool,
    released: CancellationToken,
}

impl ForwardEntry {
    /// Creates a pending entry bound to `local_port`.
    pub fn new(endpoint: ForwardableEndpoint, local_port: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: endpoint.key(),
            endpoint,
            local_port,
            status: RwLock::new(EntryStatus::Pending),
            restarts: AtomicU32::new(0),
            went_live: AtomicBool::new(false),
            released: CancellationToken::new(),
        }
    }

    /// Unique id of this entry instance. A key that is released and later
    /// re-resolved gets a new id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Canonical key of the forwarded endpoint.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn endpoint(&self) -> &ForwardableEndpoint {
        &self.endpoint
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn status(&self) -> EntryStatus {
        *self.status.read()
    }

    pub fn is_terminated(&self) -> bool {
        self.status() == EntryStatus::Terminated
    }

    /// Number of times the tunnel went live again after a break.
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Moves to `next` if allowed. Returns whether the move happened.
    pub(crate) fn transition(&self, next: EntryStatus) -> bool {
        let mut status = self.status.write();
        if !status.can_transition_to(next) {
            return false;
        }
        if next == EntryStatus::Forwarding && self.went_live.swap(true, Ordering::SeqCst) {
            // Pending -> Broken -> Forwarding is a first start, not a restart
            self.restarts.fetch_add(1, Ordering::SeqCst);
        }
        *status = next;
        true
    }

    /// Marks the entry terminated. Returns `false` if it already was.
    pub(crate) fn terminate(&self) -> bool {
        if !self.transition(EntryStatus::Terminated) {
            return false;
        }
        self.released.cancel();
        true
    }

    /// Completes once the entry is terminated.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.released.cancelled()
    }
}
