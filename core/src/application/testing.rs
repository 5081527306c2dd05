//! Test doubles for the capability traits.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::domain::{ForwardEntry, ForwardableEndpoint, LabelSelector};
use crate::error::{Error, Result};
use crate::kubernetes::discovery::ResourceStore;
use crate::kubernetes::errors::KubectlError;
use crate::kubernetes::models::KubernetesService;
use crate::ports::{EndpointDiscoverer, EntryForwarder, OnBroken, PortAllocator};

/// Hands out the preferred port if listed and free, else the first free one.
pub(crate) struct ListAllocator {
    ports: Vec<u16>,
}

impl ListAllocator {
    pub(crate) fn new(ports: &[u16]) -> Self {
        Self {
            ports: ports.to_vec(),
        }
    }
}

impl PortAllocator for ListAllocator {
    fn allocate(&self, preferred: u16, claimed: &HashSet<u16>) -> Option<u16> {
        if self.ports.contains(&preferred) && !claimed.contains(&preferred) {
            return Some(preferred);
        }
        self.ports.iter().copied().find(|p| !claimed.contains(p))
    }
}

/// Returns a fixed endpoint list, or fails on demand.
#[derive(Default)]
pub(crate) struct StaticDiscoverer {
    endpoints: Mutex<Vec<ForwardableEndpoint>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StaticDiscoverer {
    pub(crate) fn new(endpoints: Vec<ForwardableEndpoint>) -> Self {
        Self {
            endpoints: Mutex::new(endpoints),
            ..Self::default()
        }
    }

    pub(crate) fn set_endpoints(&self, endpoints: Vec<ForwardableEndpoint>) {
        *self.endpoints.lock() = endpoints;
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EndpointDiscoverer for StaticDiscoverer {
    async fn discover(
        &self,
        _run_selector: &str,
        namespaces: &[String],
    ) -> Result<Vec<ForwardableEndpoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Discovery {
                namespace: namespaces.first().cloned().unwrap_or_default(),
                source: KubectlError::from_kubectl_error("dial tcp 127.0.0.1:6443: connection refused"),
            });
        }
        Ok(self.endpoints.lock().clone())
    }
}

/// Records forwards and terminations instead of opening tunnels.
#[derive(Default)]
pub(crate) struct RecordingForwarder {
    forwarded: Mutex<HashMap<String, u16>>,
    monitors: Mutex<HashMap<String, OnBroken>>,
    terminated: Mutex<Vec<String>>,
    forward_calls: AtomicUsize,
    failures_left: AtomicUsize,
    fail_terminate: AtomicBool,
}

impl RecordingForwarder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fails the first `n` forward calls.
    pub(crate) fn failing_first(n: usize) -> Self {
        let forwarder = Self::default();
        forwarder.failures_left.store(n, Ordering::SeqCst);
        forwarder
    }

    pub(crate) fn set_fail_terminate(&self, fail: bool) {
        self.fail_terminate.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn forwarded(&self) -> HashMap<String, u16> {
        self.forwarded.lock().clone()
    }

    pub(crate) fn forward_calls(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn terminated(&self) -> Vec<String> {
        self.terminated.lock().clone()
    }

    pub(crate) fn is_monitoring(&self, key: &str) -> bool {
        self.monitors.lock().contains_key(key)
    }

    /// Simulates the tunnel for `key` dropping.
    pub(crate) fn break_tunnel(&self, key: &str) -> bool {
        let callback = self.monitors.lock().remove(key);
        self.forwarded.lock().remove(key);
        match callback {
            Some(on_broken) => {
                on_broken();
                true
            }
            None => false,
        }
    }
}

impl EntryForwarder for RecordingForwarder {
    async fn forward(&self, cancel: &CancellationToken, entry: &ForwardEntry) -> Result<()> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);

        if cancel.is_cancelled() {
            return Err(Error::Tunnel {
                key: entry.key().to_string(),
                reason: "cancelled".to_string(),
            });
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::Tunnel {
                key: entry.key().to_string(),
                reason: "pod not ready".to_string(),
            });
        }

        self.forwarded
            .lock()
            .insert(entry.key().to_string(), entry.local_port());
        Ok(())
    }

    fn monitor(&self, entry: &ForwardEntry, on_broken: OnBroken) {
        self.monitors.lock().insert(entry.key().to_string(), on_broken);
    }

    async fn terminate(&self, entry: &ForwardEntry) -> Result<()> {
        self.forwarded.lock().remove(entry.key());
        self.monitors.lock().remove(entry.key());
        self.terminated.lock().push(entry.key().to_string());

        if self.fail_terminate.load(Ordering::SeqCst) {
            return Err(Error::Termination {
                key: entry.key().to_string(),
                reason: "kubectl did not exit".to_string(),
            });
        }
        Ok(())
    }
}

/// Cloneable in-memory notice sink.
#[derive(Clone, Default)]
pub(crate) struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Cluster store backed by a list of services.
#[derive(Default)]
pub(crate) struct InMemoryStore {
    services: Vec<KubernetesService>,
    failing: bool,
}

impl InMemoryStore {
    pub(crate) fn new(services: Vec<KubernetesService>) -> Self {
        Self {
            services,
            failing: false,
        }
    }

    pub(crate) fn unreachable() -> Self {
        Self {
            services: Vec::new(),
            failing: true,
        }
    }
}

impl ResourceStore for InMemoryStore {
    async fn list_services(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> std::result::Result<Vec<KubernetesService>, KubectlError> {
        if self.failing {
            return Err(KubectlError::from_kubectl_error(
                "dial tcp 127.0.0.1:6443: connect: connection refused",
            ));
        }
        Ok(self
            .services
            .iter()
            .filter(|s| s.namespace == namespace && selector.matches(&s.labels))
            .cloned()
            .collect())
    }
}

/// Polls `condition` until it holds or five seconds pass.
pub(crate) async fn eventually<C>(condition: C) -> bool
where
    C: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
