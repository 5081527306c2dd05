//! Endpoint discovery port (interface).

use crate::domain::ForwardableEndpoint;
use crate::error::Result;

/// Port for discovering forwardable endpoints in the cluster.
pub trait EndpointDiscoverer: Send + Sync {
    /// Lists endpoints matching `run_selector` across `namespaces`.
    ///
    /// Ordering follows namespace order, then listing order, then port
    /// declaration order. A namespace without matches contributes nothing.
    /// Failing to reach the cluster fails the whole call.
    fn discover(
        &self,
        run_selector: &str,
        namespaces: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<ForwardableEndpoint>>> + Send;
}

impl<T: EndpointDiscoverer> EndpointDiscoverer for std::sync::Arc<T> {
    fn discover(
        &self,
        run_selector: &str,
        namespaces: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<ForwardableEndpoint>>> + Send {
        (**self).discover(run_selector, namespaces)
    }
}
