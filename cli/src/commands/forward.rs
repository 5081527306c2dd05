//! Forward command - run a forwarding session until Ctrl-C.

use std::sync::Arc;

use anyhow::{bail, Result};
use devforward_core::{
    ConfigStore, EntryManager, KubectlClient, KubectlForwarder, LocalPortAllocator,
    ResourceForwarder, ServiceDiscoverer,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub async fn run(
    store: &ConfigStore,
    run_id: Option<String>,
    namespaces: Vec<String>,
    once: bool,
) -> Result<()> {
    let config = store.load().await?;
    let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let namespaces = super::namespaces(&config, namespaces);
    let selector = config.run_selector(&run_id);

    let client = KubectlClient::new().with_context(config.kube_context.clone());
    if !client.is_kubectl_available() {
        bail!("kubectl not found in PATH or well-known locations");
    }

    let forwarder = KubectlForwarder::new(&client).with_address(config.address);
    let allocator = LocalPortAllocator::with_options(config.address, config.port_search_span);
    let manager = Arc::new(EntryManager::new(forwarder, allocator, std::io::stdout()));
    let session = ResourceForwarder::new(
        manager,
        ServiceDiscoverer::new(client),
        namespaces.clone(),
        selector.as_str(),
        config.port_forward.clone(),
    )
    .with_retry_policy(config.retry);

    info!(
        run_id = %run_id,
        selector = %selector,
        namespaces = ?namespaces,
        "Starting forwarding session"
    );

    let cancel = CancellationToken::new();
    session.start(&cancel).await?;

    let mut refresh = tokio::time::interval(config.refresh_period());
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    refresh.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
            _ = refresh.tick(), if !once => {
                if let Err(e) = session.start(&cancel).await {
                    warn!(error = %e, "Refresh failed, skipping this cycle");
                }
            }
        }
    }

    info!("Shutting down");
    cancel.cancel();
    session.stop().await;
    Ok(())
}
