//! Serve command handler.

use std::path::PathBuf;

use nas_sync_core::config::{ExtractBackend, ServerConfig};

use super::load_config;

/// Arguments for the serve command
#[derive(clap::Parser)]
pub struct ServeArgs {
    /// Address to listen on (overrides `server.bind`)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Directory holding upload sessions (overrides `server.temp_root`)
    #[arg(long)]
    pub temp_root: Option<PathBuf>,

    /// Extract in-process instead of running the system `unzip`
    #[arg(long)]
    pub builtin_extract: bool,
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let config = merge_args(load_config().server, args);

    println!("\nnas-sync v{} assembler", env!("CARGO_PKG_VERSION"));
    println!("─────────────────────────────────────");
    println!();
    println!("  Listening on: {}", config.bind);
    println!("  Sessions in:  {}", config.temp_root.display());
    println!("  Extraction:   {:?}", config.extract_backend);
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    nas_sync_core::server::serve(&config).await?;
    Ok(())
}

fn merge_args(mut server: ServerConfig, args: ServeArgs) -> ServerConfig {
    if let Some(bind) = args.bind {
        server.bind = bind;
    }
    if let Some(temp_root) = args.temp_root {
        server.temp_root = temp_root;
    }
    if args.builtin_extract {
        server.extract_backend = ExtractBackend::Builtin;
    }
    server
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let server = merge_args(
            ServerConfig::default(),
            ServeArgs {
                bind: Some("127.0.0.1:9100".into()),
                temp_root: None,
                builtin_extract: true,
            },
        );
        assert_eq!(server.bind, "127.0.0.1:9100");
        assert_eq!(server.temp_root, ServerConfig::default().temp_root);
        assert_eq!(server.extract_backend, ExtractBackend::Builtin);
    }
}
