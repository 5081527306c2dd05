//! Subcommand implementations.

pub mod config;
pub mod discover;
pub mod forward;
pub mod manage;

use devforward_core::Config;

/// Namespaces given on the command line, or the configured ones.
fn namespaces(config: &Config, overrides: Vec<String>) -> Vec<String> {
    if overrides.is_empty() {
        config.namespaces.clone()
    } else {
        overrides
    }
}
