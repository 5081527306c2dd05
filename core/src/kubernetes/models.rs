//! Kubernetes data models for discovered services and their ports.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::domain::{ForwardableEndpoint, ResourceKind};

// ============================================================================
// Kubernetes Discovery Models
// ============================================================================

/// A Kubernetes service, reduced to what forwarding needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesService {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    /// Declared service ports, in declaration order.
    pub ports: Vec<u16>,
}

impl KubernetesService {
    /// One endpoint per declared port, in declaration order.
    ///
    /// The local port is left unset, so it defaults to the remote port.
    pub fn endpoints(&self) -> Vec<ForwardableEndpoint> {
        self.ports
            .iter()
            .map(|&port| {
                ForwardableEndpoint::new(
                    ResourceKind::Service,
                    self.name.clone(),
                    self.namespace.clone(),
                    port,
                )
            })
            .collect()
    }
}

// ============================================================================
// kubectl JSON Response Parsing
// ============================================================================

/// Response structure for `kubectl get services -o json`.
#[derive(Debug, Deserialize)]
pub struct ServiceListResponse {
    pub items: Vec<ServiceItem>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceItem {
    pub metadata: ServiceMetadata,
    #[serde(default)]
    pub spec: ServiceSpec,
}

#[derive(Debug, Deserialize)]
pub struct ServiceMetadata {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceSpec {
    pub ports: Option<Vec<ServicePortSpec>>,
}

#[derive(Debug, Deserialize)]
pub struct ServicePortSpec {
    pub port: u16,
}

impl ServiceListResponse {
    /// Converts the kubectl response to services, keeping listing order.
    pub fn into_services(self) -> Vec<KubernetesService> {
        self.items
            .into_iter()
            .map(|item| KubernetesService {
                name: item.metadata.name,
                namespace: item.metadata.namespace,
                labels: item.metadata.labels.unwrap_or_default(),
                ports: item
                    .spec
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| p.port)
                    .collect(),
            })
            .collect()
    }
}
