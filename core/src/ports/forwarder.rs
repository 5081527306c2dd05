//! Tunnel port (interface).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::ForwardEntry;
use crate::error::Result;

/// Restart trigger handed to [`EntryForwarder::monitor`].
pub type OnBroken = Arc<dyn Fn() + Send + Sync>;

/// Port for opening, supervising and closing tunnels.
///
/// The production implementation drives `kubectl port-forward`; tests
/// substitute a recording double.
pub trait EntryForwarder: Send + Sync + 'static {
    /// Opens a tunnel from `entry.local_port()` to the entry's remote port.
    ///
    /// Resolves once the tunnel is usable. Aborts when `cancel` fires.
    fn forward(
        &self,
        cancel: &CancellationToken,
        entry: &ForwardEntry,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Starts watching a live tunnel and returns immediately.
    ///
    /// `on_broken` is called when the tunnel drops on its own, never as a
    /// result of [`terminate`](Self::terminate).
    fn monitor(&self, entry: &ForwardEntry, on_broken: OnBroken);

    /// Tears the tunnel down.
    fn terminate(
        &self,
        entry: &ForwardEntry,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
