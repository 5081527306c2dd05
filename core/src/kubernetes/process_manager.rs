//! Process management for `kubectl port-forward` tunnels.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::discovery::KubectlClient;
use super::errors::KubectlError;
use crate::domain::ForwardEntry;
use crate::error::{Error, Result};
use crate::ports::{EntryForwarder, OnBroken};

/// Grace period before force-killing a process.
const KILL_GRACE_PERIOD: Duration = Duration::from_millis(300);

/// How long kubectl gets to report the tunnel as ready.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Line kubectl prints once the local listener is up.
const READY_MARKER: &str = "Forwarding from";

/// Number of stderr lines kept for error reporting.
const STDERR_TAIL: usize = 20;

struct Tunnel {
    /// Present until a watcher takes ownership.
    child: Option<Child>,
    stop: CancellationToken,
    watcher: Option<JoinHandle<()>>,
}

enum Readiness {
    Ready,
    Exited,
    TimedOut,
    Cancelled,
    Failed(std::io::Error),
}

/// [`EntryForwarder`] backed by one `kubectl port-forward` process per entry.
pub struct KubectlForwarder {
    kubectl_path: Option<PathBuf>,
    context: Option<String>,
    address: IpAddr,
    ready_timeout: Duration,
    /// Running tunnels by entry id.
    tunnels: Mutex<HashMap<Uuid, Tunnel>>,
}

impl KubectlForwarder {
    /// Creates a forwarder using the client's kubectl and context.
    pub fn new(client: &KubectlClient) -> Self {
        Self::with_path(client.kubectl_path().map(Path::to_path_buf))
            .with_context(client.context().map(str::to_string))
    }

    /// Creates a forwarder with a custom kubectl path.
    pub fn with_path(kubectl_path: Option<PathBuf>) -> Self {
        Self {
            kubectl_path,
            context: None,
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ready_timeout: READY_TIMEOUT,
            tunnels: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    /// Sets the local address kubectl listens on.
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    /// Number of tunnels currently registered.
    pub fn active_tunnels(&self) -> usize {
        self.tunnels.lock().len()
    }

    fn command(&self, kubectl_path: &Path, entry: &ForwardEntry) -> Command {
        let endpoint = entry.endpoint();
        let mut command = Command::new(kubectl_path);

        if let Some(context) = &self.context {
            command.args(["--context", context.as_str()]);
        }
        command.arg("port-forward");
        if !endpoint.namespace.is_empty() {
            command.args(["-n", endpoint.namespace.as_str()]);
        }
        command
            .arg(endpoint.resource_ref())
            .arg(format!("{}:{}", entry.local_port(), endpoint.port))
            .arg("--address")
            .arg(self.address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        command
    }
}

impl EntryForwarder for KubectlForwarder {
    async fn forward(&self, cancel: &CancellationToken, entry: &ForwardEntry) -> Result<()> {
        let kubectl_path = self
            .kubectl_path
            .as_deref()
            .ok_or(KubectlError::KubectlNotFound)?;

        // a re-forward replaces whatever is left of the previous tunnel
        let previous = self.tunnels.lock().remove(&entry.id());
        if let Some(previous) = previous {
            if let Err(e) = shutdown_tunnel(previous).await {
                debug!(key = entry.key(), error = %e, "Previous tunnel did not shut down cleanly");
            }
        }

        let mut child = self.command(kubectl_path, entry).spawn().map_err(|e| {
            KubectlError::ProcessError(format!("Failed to start kubectl: {}", e))
        })?;

        let key = entry.key().to_string();
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL)));
        let stderr_drain = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(key.clone(), stderr, Arc::clone(&stderr_tail))));
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KubectlError::ProcessError("kubectl stdout not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let readiness = tokio::select! {
            _ = cancel.cancelled() => Readiness::Cancelled,
            waited = timeout(self.ready_timeout, wait_ready(&mut lines)) => match waited {
                Ok(Ok(true)) => Readiness::Ready,
                Ok(Ok(false)) => Readiness::Exited,
                Ok(Err(e)) => Readiness::Failed(e),
                Err(_) => Readiness::TimedOut,
            },
        };

        if let Readiness::Ready = readiness {
            tokio::spawn(drain_stdout(key.clone(), lines));
            self.tunnels.lock().insert(
                entry.id(),
                Tunnel {
                    child: Some(child),
                    stop: CancellationToken::new(),
                    watcher: None,
                },
            );
            debug!(key = %key, local_port = entry.local_port(), "kubectl port-forward ready");
            return Ok(());
        }

        let status = match readiness {
            Readiness::Exited => child.wait().await.ok(),
            _ => {
                if let Err(e) = graceful_shutdown(&mut child).await {
                    warn!(key = %key, error = %e, "Failed to stop kubectl port-forward");
                }
                None
            }
        };
        if let Some(drain) = stderr_drain {
            let _ = timeout(Duration::from_millis(500), drain).await;
        }

        let reason = failure_reason(&readiness, status, self.ready_timeout, &stderr_tail.lock());
        Err(Error::Tunnel { key, reason })
    }

    fn monitor(&self, entry: &ForwardEntry, on_broken: OnBroken) {
        let mut tunnels = self.tunnels.lock();
        let Some(tunnel) = tunnels.get_mut(&entry.id()) else {
            debug!(key = entry.key(), "No tunnel to monitor");
            return;
        };
        let Some(mut child) = tunnel.child.take() else {
            return;
        };

        let stop = tunnel.stop.clone();
        let key = entry.key().to_string();
        tunnel.watcher = Some(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    if let Err(e) = graceful_shutdown(&mut child).await {
                        warn!(key = %key, error = %e, "Failed to stop kubectl port-forward");
                    }
                }
                status = child.wait() => {
                    match status {
                        Ok(status) => warn!(key = %key, %status, "kubectl port-forward exited"),
                        Err(e) => warn!(key = %key, error = %e, "Lost track of kubectl port-forward"),
                    }
                    on_broken();
                }
            }
        }));
    }

    async fn terminate(&self, entry: &ForwardEntry) -> Result<()> {
        let tunnel = self.tunnels.lock().remove(&entry.id());
        let Some(tunnel) = tunnel else {
            debug!(key = entry.key(), "No tunnel to terminate");
            return Ok(());
        };

        shutdown_tunnel(tunnel).await.map_err(|e| Error::Termination {
            key: entry.key().to_string(),
            reason: e.to_string(),
        })
    }
}

// =========================================================================
// Process Helpers
// =========================================================================

async fn shutdown_tunnel(mut tunnel: Tunnel) -> std::io::Result<()> {
    tunnel.stop.cancel();

    if let Some(watcher) = tunnel.watcher.take() {
        watcher.await.map_err(std::io::Error::other)?;
    }
    if let Some(mut child) = tunnel.child.take() {
        graceful_shutdown(&mut child).await?;
    }
    Ok(())
}

/// SIGTERM first, SIGKILL after [`KILL_GRACE_PERIOD`].
async fn graceful_shutdown(child: &mut Child) -> std::io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }

    if terminate_politely(child).await? {
        return Ok(());
    }

    child.kill().await
}

/// Sends SIGTERM and waits out the grace period. Returns whether the child exited.
#[cfg(unix)]
async fn terminate_politely(child: &mut Child) -> std::io::Result<bool> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(false);
    };
    if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_err() {
        return Ok(false);
    }

    match timeout(KILL_GRACE_PERIOD, child.wait()).await {
        Ok(status) => status.map(|_| true),
        Err(_) => Ok(false),
    }
}

#[cfg(not(unix))]
async fn terminate_politely(_child: &mut Child) -> std::io::Result<bool> {
    Ok(false)
}

async fn wait_ready(lines: &mut Lines<BufReader<ChildStdout>>) -> std::io::Result<bool> {
    while let Some(line) = lines.next_line().await? {
        debug!(line = %line, "kubectl stdout");
        if line.contains(READY_MARKER) {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn drain_stdout(key: String, mut lines: Lines<BufReader<ChildStdout>>) {
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(key = %key, line = %line, "kubectl stdout");
    }
}

async fn drain_stderr(key: String, stderr: ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_error_line(&line) {
            warn!(key = %key, line = %line, "kubectl reported an error");
        } else {
            debug!(key = %key, line = %line, "kubectl stderr");
        }

        let mut tail = tail.lock();
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

fn failure_reason(
    readiness: &Readiness,
    status: Option<ExitStatus>,
    ready_timeout: Duration,
    stderr: &VecDeque<String>,
) -> String {
    if let Some(port) = stderr.iter().find_map(|line| detect_port_conflict(line)) {
        return format!("local port {} already in use", port);
    }

    let detail = stderr
        .iter()
        .rev()
        .find(|line| is_error_line(line))
        .or_else(|| stderr.back());

    match readiness {
        Readiness::Cancelled => "cancelled before the tunnel was ready".to_string(),
        Readiness::TimedOut => format!("not ready after {}s", ready_timeout.as_secs_f32()),
        Readiness::Failed(e) => format!("failed to read kubectl output: {}", e),
        Readiness::Exited | Readiness::Ready => {
            let status = status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown status".to_string());
            match detail {
                Some(line) => format!("kubectl exited ({}): {}", status, line),
                None => format!("kubectl exited ({})", status),
            }
        }
    }
}

// ============================================================================
// Output Parsing
// ============================================================================

/// Checks if a line indicates an error.
pub fn is_error_line(line: &str) -> bool {
    let line_lower = line.to_lowercase();
    line_lower.contains("error")
        || line_lower.contains("failed")
        || line_lower.contains("unable to")
        || line_lower.contains("connection refused")
        || line_lower.contains("lost connection")
}

/// Detects port conflict from output line.
/// Returns the conflicting port if detected.
pub fn detect_port_conflict(line: &str) -> Option<u16> {
    // kubectl format: "listen tcp4 127.0.0.1:8080: bind: address already in use"
    if !line.to_lowercase().contains("address already in use") {
        return None;
    }

    for part in line.split(':').skip(1) {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }

        if let Ok(port) = digits.parse::<u16>() {
            // skip IP octets
            if port > 255 {
                return Some(port);
            }
        }
    }

    None
}
