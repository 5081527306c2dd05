//! Add and remove user-requested endpoints.

use anyhow::Result;
use devforward_core::{ConfigStore, ForwardableEndpoint, ResourceKind};

pub async fn add(
    store: &ConfigStore,
    kind: ResourceKind,
    name: String,
    namespace: String,
    port: u16,
    local_port: Option<u16>,
) -> Result<()> {
    let mut endpoint = ForwardableEndpoint::new(kind, name, namespace, port);
    if let Some(local_port) = local_port {
        endpoint = endpoint.with_local_port(local_port);
    }

    let key = endpoint.key();
    let preferred = endpoint.preferred_local_port();
    store.add_port_forward(endpoint).await?;

    println!("Added {} (local port {})", key, preferred);
    Ok(())
}

pub async fn remove(store: &ConfigStore, key: &str) -> Result<()> {
    let removed = store.remove_port_forward(key).await?;
    println!("Removed {}", removed.key());
    Ok(())
}
