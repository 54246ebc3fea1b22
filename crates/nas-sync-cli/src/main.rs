//! nas-sync CLI - resumable uploads into a remote NAS volume
//!
//! Moves a local file or directory through a stateless HTTP proxy into a
//! NAS volume, resuming from whatever chunks already landed.
//!
//! ## Quick Start
//!
//! ```bash
//! # On the machine that mounts the volume
//! nas-sync serve --bind 0.0.0.0:9000
//!
//! # Anywhere else
//! nas-sync sync ./site /mnt/nas/www/ --endpoint https://proxy.example.com/nas
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::struct_excessive_bools)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Sync(args) => commands::sync::run(args).await,
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Config(args) => commands::config::run(args),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,nas_sync=info,nas_sync_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
