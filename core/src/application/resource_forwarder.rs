//! Per-session forwarding controller.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::entry_manager::{EntryManager, Resolved};
use super::retry::RetryPolicy;
use crate::domain::{EntryStatus, ForwardEntry, ForwardableEndpoint};
use crate::error::{Error, Result};
use crate::ports::{EndpointDiscoverer, EntryForwarder};

/// Discovers endpoints for one dev session and keeps a tunnel alive for each.
///
/// [`start`](Self::start) may be called once per refresh cycle. Entries that
/// are already registered are left to their existing supervision task.
pub struct ResourceForwarder<D: EndpointDiscoverer, F: EntryForwarder> {
    manager: Arc<EntryManager<F>>,
    discoverer: D,
    namespaces: Vec<String>,
    run_selector: String,
    user_defined: Vec<ForwardableEndpoint>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<D: EndpointDiscoverer, F: EntryForwarder> ResourceForwarder<D, F> {
    pub fn new(
        manager: Arc<EntryManager<F>>,
        discoverer: D,
        namespaces: Vec<String>,
        run_selector: impl Into<String>,
        user_defined: Vec<ForwardableEndpoint>,
    ) -> Self {
        Self {
            manager,
            discoverer,
            namespaces,
            run_selector: run_selector.into(),
            user_defined,
            retry: RetryPolicy::default(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn manager(&self) -> &Arc<EntryManager<F>> {
        &self.manager
    }

    /// Discovers endpoints and dispatches a supervision task for each new one.
    ///
    /// Returns as soon as the tasks are spawned. Only discovery failures are
    /// returned; an endpoint without a free local port is skipped and picked
    /// up again on the next call.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        if self.shutdown.is_cancelled() || cancel.is_cancelled() {
            debug!("Session cancelled, not starting");
            return Ok(());
        }

        let discovered = self
            .discoverer
            .discover(&self.run_selector, &self.namespaces)
            .await?;
        let endpoints = merge_endpoints(&self.user_defined, discovered);

        let mut dispatched = 0usize;
        let mut skipped = 0usize;
        for endpoint in &endpoints {
            match self.manager.resolve(endpoint) {
                Ok(Resolved {
                    entry,
                    created: true,
                }) => {
                    self.dispatch(cancel, entry);
                    dispatched += 1;
                }
                Ok(_) => {}
                Err(e @ Error::PortExhausted { .. }) => {
                    warn!(key = %endpoint.key(), error = %e, "Skipping endpoint");
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            endpoints = endpoints.len(),
            dispatched,
            skipped,
            selector = %self.run_selector,
            "Forwarding session started"
        );
        Ok(())
    }

    /// Stops every supervision task and releases all entries.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Supervision task panicked");
            }
        }

        self.manager.terminate_all().await;
        info!("Forwarding session stopped");
    }

    fn dispatch(&self, cancel: &CancellationToken, entry: Arc<ForwardEntry>) {
        let handle = tokio::spawn(supervise(
            Arc::clone(&self.manager),
            entry,
            self.retry,
            cancel.clone(),
            self.shutdown.clone(),
        ));

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

/// User-requested endpoints first, then discovered ones; first key wins.
fn merge_endpoints(
    user_defined: &[ForwardableEndpoint],
    discovered: Vec<ForwardableEndpoint>,
) -> Vec<ForwardableEndpoint> {
    let mut seen = HashSet::new();
    user_defined
        .iter()
        .cloned()
        .chain(discovered)
        .filter(|endpoint| seen.insert(endpoint.key()))
        .collect()
}

// =========================================================================
// Supervision
// =========================================================================

/// Keeps one entry forwarded until cancellation or until retries run out.
async fn supervise<F: EntryForwarder>(
    manager: Arc<EntryManager<F>>,
    entry: Arc<ForwardEntry>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    shutdown: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            let Some(delay) = retry.backoff(attempt) else {
                error!(
                    key = entry.key(),
                    local_port = entry.local_port(),
                    attempt,
                    "Giving up on port forward"
                );
                break;
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = shutdown.cancelled() => break,
                _ = entry.terminated() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shutdown.cancelled() => break,
            _ = entry.terminated() => break,
            outcome = manager.forward_entry(&cancel, &entry) => outcome,
        };

        if let Err(e) = outcome {
            attempt += 1;
            warn!(
                key = entry.key(),
                local_port = entry.local_port(),
                attempt,
                error = %e,
                "Port forward failed"
            );
            continue;
        }

        let broken = Arc::new(Notify::new());
        let signal = Arc::clone(&broken);
        manager.monitor_entry(&entry, Arc::new(move || signal.notify_one()));

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shutdown.cancelled() => break,
            _ = entry.terminated() => break,
            _ = broken.notified() => {
                if !entry.transition(EntryStatus::Broken) {
                    break;
                }
                attempt = 1;
                warn!(
                    key = entry.key(),
                    local_port = entry.local_port(),
                    "Port forward broke, reconnecting"
                );
            }
        }
    }

    if let Err(e) = manager.terminate_entry(&entry).await {
        warn!(key = entry.key(), error = %e, "Teardown failed, port released anyway");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{
        eventually, ListAllocator, RecordingForwarder, SharedSink, StaticDiscoverer,
    };
    use crate::domain::ResourceKind;
    use tokio_test::assert_ok;

    type Session = ResourceForwarder<Arc<StaticDiscoverer>, RecordingForwarder>;

    fn service(name: &str, port: u16) -> ForwardableEndpoint {
        ForwardableEndpoint::new(ResourceKind::Service, name, "default", port)
            .with_local_port(port)
    }

    fn session_with(
        forwarder: RecordingForwarder,
        ports: &[u16],
        discovered: Vec<ForwardableEndpoint>,
        user_defined: Vec<ForwardableEndpoint>,
    ) -> (Session, Arc<StaticDiscoverer>) {
        let discoverer = Arc::new(StaticDiscoverer::new(discovered));
        let manager = Arc::new(EntryManager::new(
            forwarder,
            ListAllocator::new(ports),
            SharedSink::default(),
        ));
        let session = ResourceForwarder::new(
            manager,
            Arc::clone(&discoverer),
            vec!["default".to_string()],
            "devforward.dev/run-id=1234",
            user_defined,
        )
        .with_retry_policy(RetryPolicy::immediate(Some(3)));
        (session, discoverer)
    }

    fn session(
        ports: &[u16],
        discovered: Vec<ForwardableEndpoint>,
        user_defined: Vec<ForwardableEndpoint>,
    ) -> (Session, Arc<StaticDiscoverer>) {
        session_with(RecordingForwarder::new(), ports, discovered, user_defined)
    }

    fn forwarder(session: &Session) -> &RecordingForwarder {
        session.manager().forwarder()
    }

    fn all_forwarding(session: &Session, count: usize) -> bool {
        let entries = session.manager().registry().entries();
        entries.len() == count && entries.iter().all(|e| e.status() == EntryStatus::Forwarding)
    }

    #[tokio::test]
    async fn test_two_discovered_services() {
        let (session, _) = session(
            &[8080, 9000],
            vec![service("svc1", 8080), service("svc2", 9000)],
            vec![],
        );
        let cancel = CancellationToken::new();

        assert_ok!(session.start(&cancel).await);
        assert!(eventually(|| all_forwarding(&session, 2)).await);

        let forwarded = forwarder(&session).forwarded();
        assert_eq!(forwarded.len(), 2);
        assert_eq!(forwarded.get("service-svc1-default-8080"), Some(&8080));
        assert_eq!(forwarded.get("service-svc2-default-9000"), Some(&9000));

        session.stop().await;
    }

    #[tokio::test]
    async fn test_user_pod_and_discovered_service() {
        let pod = ForwardableEndpoint::new(ResourceKind::Pod, "podName", "default", 8080);
        let (session, _) = session(&[8080, 9000], vec![service("svc1", 9000)], vec![pod]);

        assert_ok!(session.start(&CancellationToken::new()).await);
        assert!(eventually(|| all_forwarding(&session, 2)).await);

        let keys = session.manager().registry().keys();
        assert_eq!(keys, vec!["pod-podname-default-8080", "service-svc1-default-9000"]);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_discovery_failure_dispatches_nothing() {
        let (session, discoverer) = session(&[8080], vec![service("svc1", 8080)], vec![]);
        discoverer.set_failing(true);

        let err = session.start(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_session_fatal());
        assert!(session.manager().registry().is_empty());
        assert_eq!(forwarder(&session).forward_calls(), 0);
    }

    #[tokio::test]
    async fn test_restart_does_not_reforward_live_entries() {
        let (session, discoverer) = session(&[8080, 9000], vec![service("svc1", 8080)], vec![]);
        let cancel = CancellationToken::new();

        session.start(&cancel).await.unwrap();
        assert!(eventually(|| all_forwarding(&session, 1)).await);

        discoverer.set_endpoints(vec![service("svc1", 8080), service("svc2", 9000)]);
        session.start(&cancel).await.unwrap();
        session.start(&cancel).await.unwrap();
        assert!(eventually(|| all_forwarding(&session, 2)).await);

        assert_eq!(forwarder(&session).forward_calls(), 2);
        assert_eq!(discoverer.calls(), 3);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_keys_collapse_and_explicit_port_wins() {
        let discovered = service("svc1", 8080);
        let requested = ForwardableEndpoint::new(ResourceKind::Service, "SVC1", "default", 8080)
            .with_local_port(18080);
        let (session, _) = session(&[8080, 18080], vec![discovered], vec![requested]);

        session.start(&CancellationToken::new()).await.unwrap();
        assert!(eventually(|| all_forwarding(&session, 1)).await);

        let entry = session.manager().registry().get("service-svc1-default-8080").unwrap();
        assert_eq!(entry.local_port(), 18080);
        assert_eq!(forwarder(&session).forward_calls(), 1);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_exhausted_endpoint_is_retried_next_cycle() {
        let (session, discoverer) = session(
            &[8080],
            vec![service("svc1", 8080), service("svc2", 9000)],
            vec![],
        );
        let cancel = CancellationToken::new();

        session.start(&cancel).await.unwrap();
        assert!(eventually(|| all_forwarding(&session, 1)).await);
        assert!(!session.manager().registry().contains("service-svc2-default-9000"));

        // svc1 goes away, freeing the only port
        let svc1 = session.manager().registry().get("service-svc1-default-8080").unwrap();
        session.manager().terminate_entry(&svc1).await.unwrap();
        discoverer.set_endpoints(vec![service("svc2", 9000)]);

        session.start(&cancel).await.unwrap();
        assert!(eventually(|| {
            session
                .manager()
                .registry()
                .get("service-svc2-default-9000")
                .is_some_and(|e| e.status() == EntryStatus::Forwarding)
        })
        .await);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_broken_tunnel_is_reforwarded_on_same_port() {
        let (session, _) = session(&[8080], vec![service("svc1", 8080)], vec![]);
        let key = "service-svc1-default-8080";

        session.start(&CancellationToken::new()).await.unwrap();
        assert!(eventually(|| forwarder(&session).is_monitoring(key)).await);

        assert!(forwarder(&session).break_tunnel(key));
        assert!(eventually(|| forwarder(&session).is_monitoring(key)).await);

        let entry = session.manager().registry().get(key).unwrap();
        assert_eq!(entry.status(), EntryStatus::Forwarding);
        assert_eq!(entry.restarts(), 1);
        assert_eq!(entry.local_port(), 8080);
        assert_eq!(forwarder(&session).forwarded().get(key), Some(&8080));
        assert_eq!(forwarder(&session).forward_calls(), 2);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_failed_forward_is_retried() {
        let (session, _) = session_with(
            RecordingForwarder::failing_first(2),
            &[8080],
            vec![service("svc1", 8080)],
            vec![],
        );

        session.start(&CancellationToken::new()).await.unwrap();
        assert!(eventually(|| all_forwarding(&session, 1)).await);
        assert_eq!(forwarder(&session).forward_calls(), 3);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_abandoned_entry_is_released() {
        let (session, _) = session_with(
            RecordingForwarder::failing_first(usize::MAX),
            &[8080],
            vec![service("svc1", 8080)],
            vec![],
        );

        session.start(&CancellationToken::new()).await.unwrap();
        assert!(eventually(|| session.manager().registry().is_empty()).await);
        assert!(session.manager().ledger().is_empty());
        // initial attempt plus three retries
        assert_eq!(forwarder(&session).forward_calls(), 4);
    }

    #[tokio::test]
    async fn test_cancellation_terminates_all() {
        let (session, _) = session(
            &[8080, 9000],
            vec![service("svc1", 8080), service("svc2", 9000)],
            vec![],
        );
        let cancel = CancellationToken::new();

        session.start(&cancel).await.unwrap();
        assert!(eventually(|| all_forwarding(&session, 2)).await);

        cancel.cancel();
        assert!(eventually(|| session.manager().registry().is_empty()).await);
        assert!(session.manager().ledger().is_empty());
        assert!(forwarder(&session).forwarded().is_empty());

        // a cancelled session does not start again
        session.start(&cancel).await.unwrap();
        assert!(session.manager().registry().is_empty());
    }

    #[tokio::test]
    async fn test_stop_terminates_all() {
        let (session, _) = session(
            &[8080, 9000],
            vec![service("svc1", 8080), service("svc2", 9000)],
            vec![],
        );

        session.start(&CancellationToken::new()).await.unwrap();
        assert!(eventually(|| all_forwarding(&session, 2)).await);

        session.stop().await;
        assert!(session.manager().registry().is_empty());
        assert!(session.manager().ledger().is_empty());

        let mut terminated = forwarder(&session).terminated();
        terminated.sort();
        assert_eq!(
            terminated,
            vec!["service-svc1-default-8080", "service-svc2-default-9000"]
        );
    }

    #[test]
    fn test_merge_keeps_user_defined_first() {
        let user = vec![service("a", 1).with_local_port(10001)];
        let discovered = vec![service("b", 2), service("a", 1), service("b", 2)];

        let merged = merge_endpoints(&user, discovered);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].local_port, Some(10001));
        assert_eq!(merged[1].name, "b");
    }
}
