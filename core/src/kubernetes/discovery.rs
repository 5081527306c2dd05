//! Kubernetes service discovery using kubectl commands.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::errors::{KubectlError, Result};
use super::models::{KubernetesService, ServiceListResponse};
use crate::domain::{ForwardableEndpoint, LabelSelector};
use crate::error::Error;
use crate::ports::EndpointDiscoverer;

/// Default paths to search for kubectl.
const KUBECTL_PATHS: &[&str] = &[
    "/opt/homebrew/bin/kubectl", // Apple Silicon
    "/usr/local/bin/kubectl",    // Intel Mac / Homebrew
    "/usr/bin/kubectl",          // System
];

/// Timeout for kubectl discovery commands.
const KUBECTL_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// Resource store
// ============================================================================

/// Cluster query boundary used by [`ServiceDiscoverer`].
pub trait ResourceStore: Send + Sync {
    /// Lists services in `namespace` matching `selector`, in listing order.
    fn list_services(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> impl std::future::Future<Output = Result<Vec<KubernetesService>>> + Send;
}

/// kubectl-backed [`ResourceStore`].
#[derive(Debug, Clone)]
pub struct KubectlClient {
    kubectl_path: Option<PathBuf>,
    context: Option<String>,
}

impl KubectlClient {
    /// Creates a client, searching well-known locations and then `PATH`.
    pub fn new() -> Self {
        Self {
            kubectl_path: find_kubectl(),
            context: None,
        }
    }

    /// Creates a client with a custom kubectl path.
    pub fn with_path(kubectl_path: Option<PathBuf>) -> Self {
        Self {
            kubectl_path,
            context: None,
        }
    }

    /// Targets a specific kubeconfig context.
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn kubectl_path(&self) -> Option<&Path> {
        self.kubectl_path.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns true if kubectl is available.
    pub fn is_kubectl_available(&self) -> bool {
        self.kubectl_path.is_some()
    }

    /// Fetches services in `namespace` whose labels match `selector`.
    pub async fn fetch_services(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<KubernetesService>> {
        let mut args = vec!["get", "services", "-n", namespace];
        if !selector.is_empty() {
            args.extend(["-l", selector.as_str()]);
        }
        args.extend(["-o", "json", "--request-timeout=10s"]);

        let output = self.execute_kubectl(&args).await?;

        let response: ServiceListResponse = serde_json::from_str(&output)
            .map_err(|e| KubectlError::ParsingFailed(e.to_string()))?;

        Ok(response.into_services())
    }

    /// Executes a kubectl command and returns the output.
    async fn execute_kubectl(&self, args: &[&str]) -> Result<String> {
        let kubectl_path = self
            .kubectl_path
            .as_ref()
            .ok_or(KubectlError::KubectlNotFound)?;

        let mut command = Command::new(kubectl_path);
        if let Some(context) = &self.context {
            command.args(["--context", context.as_str()]);
        }
        command.args(args).kill_on_drop(true);

        let result = timeout(KUBECTL_TIMEOUT, async {
            let output = command.output().await?;

            Ok::<_, std::io::Error>((output.status, output.stdout, output.stderr))
        })
        .await;

        match result {
            Ok(Ok((status, stdout, stderr))) => {
                if status.success() {
                    String::from_utf8(stdout)
                        .map_err(|e| KubectlError::ParsingFailed(e.to_string()))
                } else {
                    let stderr_str = String::from_utf8_lossy(&stderr);
                    Err(KubectlError::from_kubectl_error(&stderr_str))
                }
            }
            Ok(Err(e)) => Err(KubectlError::Io(e)),
            Err(_) => Err(KubectlError::Timeout),
        }
    }
}

impl Default for KubectlClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore for KubectlClient {
    async fn list_services(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<KubernetesService>> {
        self.fetch_services(namespace, selector).await
    }
}

/// Finds kubectl in well-known locations, then on `PATH`.
pub fn find_kubectl() -> Option<PathBuf> {
    find_executable(KUBECTL_PATHS).or_else(|| {
        let path = env::var_os("PATH")?;
        env::split_paths(&path)
            .map(|dir| dir.join("kubectl"))
            .find(|candidate| candidate.is_file())
    })
}

/// Finds an executable in the given paths.
fn find_executable(paths: &[&str]) -> Option<PathBuf> {
    for path in paths {
        let path_buf = PathBuf::from(path);
        if path_buf.exists() {
            return Some(path_buf);
        }
    }
    None
}

// ============================================================================
// Service discoverer
// ============================================================================

/// Turns labelled services into forwardable endpoints.
///
/// Namespaces are queried in the order given. Within a namespace, services
/// keep their listing order and each contributes one endpoint per port.
pub struct ServiceDiscoverer<S: ResourceStore> {
    store: S,
}

impl<S: ResourceStore> ServiceDiscoverer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: ResourceStore> EndpointDiscoverer for ServiceDiscoverer<S> {
    async fn discover(
        &self,
        run_selector: &str,
        namespaces: &[String],
    ) -> crate::error::Result<Vec<ForwardableEndpoint>> {
        let selector = LabelSelector::parse(run_selector).map_err(Error::InvalidSelector)?;
        let mut endpoints = Vec::new();

        for namespace in namespaces {
            let services = self
                .store
                .list_services(namespace, &selector)
                .await
                .map_err(|source| Error::Discovery {
                    namespace: namespace.clone(),
                    source,
                })?;

            // the store may ignore the selector
            let before = endpoints.len();
            for service in services.iter().filter(|s| selector.matches(&s.labels)) {
                endpoints.extend(service.endpoints());
            }

            debug!(
                namespace = %namespace,
                services = services.len(),
                endpoints = endpoints.len() - before,
                "Discovered services"
            );
        }

        Ok(endpoints)
    }
}
