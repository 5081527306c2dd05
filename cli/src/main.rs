//! devforward CLI - Forward a dev session's Kubernetes resources to local ports
//!
//! A command-line driver that discovers the services of a dev session,
//! forwards each of them to a local port and keeps the tunnels alive.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use devforward_core::{ConfigStore, ResourceKind};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "devforward")]
#[command(author, version, about = "Forward Kubernetes dev-session resources to local ports")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover and forward session resources until interrupted
    #[command(alias = "fwd")]
    Forward {
        /// Run id labelling this session's resources (random if omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Namespace to search (repeatable, overrides config)
        #[arg(short = 'n', long = "namespace")]
        namespaces: Vec<String>,

        /// Discover once instead of refreshing periodically
        #[arg(long)]
        once: bool,
    },

    /// Show the endpoints a session would forward
    Discover {
        /// Run id labelling the session's resources
        #[arg(long)]
        run_id: String,

        /// Namespace to search (repeatable, overrides config)
        #[arg(short = 'n', long = "namespace")]
        namespaces: Vec<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show current configuration
    Config {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Always forward an endpoint, discovered or not
    Add {
        /// Resource kind (service, pod, deployment)
        kind: ResourceKind,
        /// Resource name
        name: String,
        /// Remote port
        port: u16,
        /// Namespace of the resource
        #[arg(short = 'n', long, default_value = "default")]
        namespace: String,
        /// Preferred local port (defaults to the remote port)
        #[arg(long)]
        local_port: Option<u16>,
    },

    /// Stop always forwarding an endpoint
    #[command(alias = "rm")]
    Remove {
        /// Canonical key, e.g. service-web-default-8080
        key: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = match cli.config {
        Some(path) => ConfigStore::with_path(path),
        None => ConfigStore::new()?,
    };

    match cli.command {
        Commands::Forward {
            run_id,
            namespaces,
            once,
        } => commands::forward::run(&store, run_id, namespaces, once).await?,
        Commands::Discover {
            run_id,
            namespaces,
            json,
        } => commands::discover::run(&store, &run_id, namespaces, json).await?,
        Commands::Config { json } => commands::config::show(&store, json).await?,
        Commands::Add {
            kind,
            name,
            port,
            namespace,
            local_port,
        } => commands::manage::add(&store, kind, name, namespace, port, local_port).await?,
        Commands::Remove { key } => commands::manage::remove(&store, &key).await?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,devforward={level},devforward_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
