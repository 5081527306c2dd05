//! Forwardable endpoint domain model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// ResourceKind
// ============================================================================

/// Kind of cluster resource a tunnel can be opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A Service; kubectl picks one of its backing pods.
    Service,
    /// A single named Pod.
    Pod,
    /// A pod controlled by a Deployment.
    Deployment,
}

impl ResourceKind {
    /// Lower-case name used in canonical keys and kubectl resource references.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Pod => "pod",
            Self::Deployment => "deployment",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "service" | "services" | "svc" => Ok(Self::Service),
            "pod" | "pods" | "po" => Ok(Self::Pod),
            "deployment" | "deployments" | "deploy" => Ok(Self::Deployment),
            other => Err(format!("unsupported resource kind: {}", other)),
        }
    }
}

// ============================================================================
// ForwardableEndpoint
// ============================================================================

/// A remote, namespaced, ported resource that can be forwarded to a local port.
///
/// Produced either by discovery or by user configuration. Two endpoints with
/// the same kind, name, namespace and remote port share a [canonical key],
/// whatever local port they prefer.
///
/// [canonical key]: ForwardableEndpoint::key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardableEndpoint {
    #[serde(rename = "resourceType")]
    pub kind: ResourceKind,
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Port on the cluster side.
    pub port: u16,
    /// Preferred local port; the remote port is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ForwardableEndpoint {
    /// Creates an endpoint that prefers its remote port locally.
    pub fn new(
        kind: ResourceKind,
        name: impl Into<String>,
        namespace: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            port,
            local_port: None,
        }
    }

    /// Sets an explicit preferred local port.
    pub fn with_local_port(mut self, local_port: u16) -> Self {
        self.local_port = Some(local_port);
        self
    }

    /// The local port allocation starts from.
    pub fn preferred_local_port(&self) -> u16 {
        self.local_port.unwrap_or(self.port)
    }

    /// Canonical key: `<kind>-<name>-<namespace>-<port>`, lower-cased.
    pub fn key(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.kind, self.name, self.namespace, self.port
        )
        .to_lowercase()
    }

    /// kubectl resource reference, e.g. `service/my-svc`.
    pub fn resource_ref(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

impl fmt::Display for ForwardableEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} in {} (port {})",
            self.kind, self.name, self.namespace, self.port
        )
    }
}
