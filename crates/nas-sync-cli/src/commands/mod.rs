//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};

pub mod config;
pub mod serve;
pub mod sync;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, it falls back to
/// defaults so a broken file never blocks a sync.
pub fn load_config() -> nas_sync_core::config::Config {
    match nas_sync_core::config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring configuration file");
            nas_sync_core::config::Config::default()
        }
    }
}

/// nas-sync - resumable uploads into a remote NAS volume
#[derive(Parser)]
#[command(name = "nas-sync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Sync a local file or directory to a remote path
    Sync(sync::SyncArgs),

    /// Run the remote assembler next to the NAS volume
    Serve(serve::ServeArgs),

    /// Manage configuration
    Config(config::ConfigArgs),
}
