//! Config command - show the effective configuration.

use anyhow::Result;
use devforward_core::ConfigStore;

pub async fn show(store: &ConfigStore, json: bool) -> Result<()> {
    let config = store.load().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Config file:      {}", store.config_path().display());
    println!("Namespaces:       {}", config.namespaces.join(", "));
    println!("Run label:        {}", config.run_label);
    println!("Refresh interval: {}s", config.refresh_interval);
    println!("Listen address:   {}", config.address);
    println!("Port search span: {}", config.port_search_span);
    println!(
        "Kube context:     {}",
        config.kube_context.as_deref().unwrap_or("(current)")
    );
    println!(
        "Retry:            {}ms initial, {}ms max, {}",
        config.retry.initial_backoff_ms,
        config.retry.max_backoff_ms,
        match config.retry.max_attempts {
            Some(n) => format!("{} attempts", n),
            None => "unlimited attempts".to_string(),
        }
    );

    if config.port_forward.is_empty() {
        println!("Port forwards:    (none)");
    } else {
        println!("Port forwards:");
        for endpoint in &config.port_forward {
            println!(
                "  {} -> local {}",
                endpoint.key(),
                endpoint.preferred_local_port()
            );
        }
    }

    Ok(())
}
