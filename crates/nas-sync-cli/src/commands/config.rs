//! Config command handler.

use std::path::PathBuf;

use anyhow::Context;
use clap::Subcommand;

use nas_sync_core::config::Config;

/// Arguments for the config command
#[derive(clap::Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration as TOML
    Show,

    /// Show the configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,

        /// Write here instead of the default location
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

/// Run the config command
pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = Config::load().context("failed to load configuration")?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
        ConfigAction::Init { force, path } => {
            let path = path.unwrap_or_else(Config::config_path);
            init(&path, force)?;
            println!("  ✓ Wrote {}", path.display());
        }
    }
    Ok(())
}

fn init(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }
    Config::default()
        .save_to(path)
        .with_context(|| format!("failed to write {}", path.display()))
}
