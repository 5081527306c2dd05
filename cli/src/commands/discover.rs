//! Discover command - show the endpoints a session would forward.

use std::collections::HashSet;

use anyhow::Result;
use devforward_core::{
    ConfigStore, EndpointDiscoverer, ForwardableEndpoint, KubectlClient, ServiceDiscoverer,
};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Row {
    key: String,
    #[serde(flatten)]
    endpoint: ForwardableEndpoint,
    source: &'static str,
}

pub async fn run(
    store: &ConfigStore,
    run_id: &str,
    namespaces: Vec<String>,
    json: bool,
) -> Result<()> {
    let config = store.load().await?;
    let namespaces = super::namespaces(&config, namespaces);
    let selector = config.run_selector(run_id);

    let client = KubectlClient::new().with_context(config.kube_context.clone());
    let discovered = ServiceDiscoverer::new(client)
        .discover(&selector, &namespaces)
        .await?;

    let mut seen = HashSet::new();
    let rows: Vec<Row> = config
        .port_forward
        .iter()
        .cloned()
        .map(|endpoint| (endpoint, "config"))
        .chain(discovered.into_iter().map(|endpoint| (endpoint, "discovered")))
        .filter(|(endpoint, _)| seen.insert(endpoint.key()))
        .map(|(endpoint, source)| Row {
            key: endpoint.key(),
            endpoint,
            source,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No endpoints found for {}.", selector);
        return Ok(());
    }

    // Table header
    println!(
        "{:<40} {:<20} {:<15} {:<6} {:<6} SOURCE",
        "KEY", "NAME", "NAMESPACE", "PORT", "LOCAL"
    );
    println!("{}", "-".repeat(100));

    for row in &rows {
        println!(
            "{:<40} {:<20} {:<15} {:<6} {:<6} {}",
            truncate(&row.key, 40),
            truncate(&row.endpoint.name, 20),
            truncate(&row.endpoint.namespace, 15),
            row.endpoint.port,
            row.endpoint.preferred_local_port(),
            row.source
        );
    }

    println!("\nTotal: {} endpoints", rows.len());
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max - 1).collect();
        format!("{}…", kept)
    }
}
