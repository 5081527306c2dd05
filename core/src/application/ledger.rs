//! Claimed local ports.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Set of local ports currently claimed by live entries.
///
/// One lock guards the whole set. [`claim_with`](Self::claim_with) runs the
/// allocation decision and the claim under that lock so two callers can
/// never be handed the same port.
#[derive(Debug, Default)]
pub struct PortLedger {
    claimed: Mutex<HashSet<u16>>,
}

impl PortLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `port`. Returns `false` if it was already claimed.
    pub fn claim(&self, port: u16) -> bool {
        self.claimed.lock().insert(port)
    }

    /// Releases `port`. Returns `false` if it was not claimed.
    pub fn release(&self, port: u16) -> bool {
        self.claimed.lock().remove(&port)
    }

    pub fn is_claimed(&self, port: u16) -> bool {
        self.claimed.lock().contains(&port)
    }

    /// Chooses a port with `pick` and claims it atomically.
    ///
    /// `pick` sees the claimed set as of the call and must return an
    /// unclaimed port or `None`.
    pub fn claim_with<F>(&self, pick: F) -> Option<u16>
    where
        F: FnOnce(&HashSet<u16>) -> Option<u16>,
    {
        let mut claimed = self.claimed.lock();
        let port = pick(&claimed)?;
        if !claimed.insert(port) {
            return None;
        }
        Some(port)
    }

    /// Copy of the claimed set.
    pub fn claimed(&self) -> HashSet<u16> {
        self.claimed.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.claimed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_release() {
        let ledger = PortLedger::new();
        assert!(ledger.claim(8080));
        assert!(!ledger.claim(8080));
        assert!(ledger.is_claimed(8080));

        assert!(ledger.release(8080));
        assert!(!ledger.release(8080));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_claim_with_sees_claimed_set() {
        let ledger = PortLedger::new();
        ledger.claim(3000);

        let port = ledger.claim_with(|claimed| (3000..3010).find(|p| !claimed.contains(p)));
        assert_eq!(port, Some(3001));
        assert!(ledger.is_claimed(3001));
    }

    #[test]
    fn test_claim_with_rejects_taken_port() {
        let ledger = PortLedger::new();
        ledger.claim(3000);
        assert_eq!(ledger.claim_with(|_| Some(3000)), None);
        assert_eq!(ledger.claim_with(|_| None), None);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_concurrent_claims_never_collide() {
        let ledger = PortLedger::new();
        let mut ports = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        ledger.claim_with(|claimed| (5000..5100).find(|p| !claimed.contains(p)))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap().unwrap())
                .collect::<Vec<_>>()
        });

        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 16);
    }
}
