//! Sync command handler.

use std::path::PathBuf;

use anyhow::Context;
use tokio::sync::watch;

use nas_sync_core::chunk::format_size;
use nas_sync_core::config::ClientConfig;
use nas_sync_core::sync::{SyncOptions, SyncPhase, SyncProgress, SyncReport, SyncSession};
use nas_sync_core::transport::HttpTransport;

use super::load_config;

/// Arguments for the sync command
#[derive(clap::Parser)]
pub struct SyncArgs {
    /// Local file or directory to upload
    pub source: PathBuf,

    /// Remote destination path; a trailing `/` means "into this directory"
    pub dst_path: String,

    /// Base URL of the proxy function (overrides `client.endpoint`)
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Chunk size (e.g., 5MB)
    #[arg(long, value_parser = parse_size)]
    pub chunk_size: Option<usize>,

    /// Concurrent chunk uploads and unzip batches
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Archive entries per unzip request
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Keep files that already exist at the destination
    #[arg(long)]
    pub no_clobber: bool,

    /// Skip the protocol version check
    #[arg(long)]
    pub skip_version_check: bool,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run the sync command
pub async fn run(args: SyncArgs) -> anyhow::Result<()> {
    let config = load_config();
    let client = merge_args(config.client, &args);
    client.validate()?;

    let endpoint = client
        .endpoint
        .clone()
        .context("no endpoint given; pass --endpoint or set client.endpoint")?;
    let transport = HttpTransport::new(&endpoint, client.request_timeout)
        .with_context(|| format!("invalid endpoint '{endpoint}'"))?;

    if !args.quiet && !args.json {
        println!("\nnas-sync v{}", env!("CARGO_PKG_VERSION"));
        println!("─────────────────────────────────────");
        println!();
        println!("  Source:      {}", args.source.display());
        println!("  Destination: {}", args.dst_path);
        println!("  Chunk size:  {}", format_size(client.chunk_size as u64));
        println!();
    }

    let session = SyncSession::new(transport, SyncOptions::from(&client));
    let printer = (!args.quiet && !args.json).then(|| tokio::spawn(print_progress(session.progress())));

    let result = session.run(&args.source, &args.dst_path).await;

    if let Some(printer) = printer {
        printer.abort();
    }

    match result {
        Ok(report) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if !args.quiet {
                print_report(&report);
            }
            Ok(())
        }
        Err(e) => {
            if !args.quiet {
                eprintln!();
                eprintln!("  ✗ {}", e);
                if let Some(suggestion) = e.suggestion() {
                    eprintln!("    {}", suggestion);
                }
            }
            Err(e.into())
        }
    }
}

fn merge_args(mut client: ClientConfig, args: &SyncArgs) -> ClientConfig {
    if let Some(endpoint) = &args.endpoint {
        client.endpoint = Some(endpoint.clone());
    }
    if let Some(chunk_size) = args.chunk_size {
        client.chunk_size = chunk_size;
    }
    if let Some(parallel) = args.parallel {
        client.parallel_uploads = parallel;
    }
    if let Some(batch_size) = args.batch_size {
        client.unzip_batch_size = batch_size;
    }
    if args.no_clobber {
        client.overwrite = false;
    }
    if args.skip_version_check {
        client.check_version = false;
    }
    client
}

async fn print_progress(mut progress: watch::Receiver<SyncProgress>) {
    let mut last_phase = SyncPhase::Idle;

    while progress.changed().await.is_ok() {
        let snapshot = progress.borrow_and_update().clone();

        if snapshot.phase != last_phase {
            last_phase = snapshot.phase;
            match snapshot.phase {
                SyncPhase::Pack => println!("  → Packing source..."),
                SyncPhase::Negotiate => println!("  → Negotiating with remote..."),
                SyncPhase::Upload => println!("  → Uploading..."),
                SyncPhase::Merge => println!("  → Merging chunks..."),
                SyncPhase::Extract => println!("  → Extracting..."),
                SyncPhase::Clean => println!("  → Cleaning up..."),
                SyncPhase::Idle | SyncPhase::Done => {}
            }
        }

        match snapshot.phase {
            SyncPhase::Upload if snapshot.chunks_total > 0 => println!(
                "    {}/{} chunks ({} / {}, {:.0}%)",
                snapshot.chunks_done,
                snapshot.chunks_total,
                format_size(snapshot.bytes_done),
                format_size(snapshot.bytes_total),
                snapshot.upload_fraction() * 100.0
            ),
            SyncPhase::Extract if snapshot.entries_total > 0 => println!(
                "    {}/{} entries",
                snapshot.entries_extracted, snapshot.entries_total
            ),
            _ => {}
        }
    }
}

fn print_report(report: &SyncReport) {
    println!();
    println!("  ✓ Synced to {}", report.remote_path);
    println!("    Size:    {}", format_size(report.size));
    println!(
        "    Chunks:  {} uploaded, {} already present",
        report.chunks_uploaded, report.chunks_skipped
    );
    if report.chunks_resent > 0 {
        println!("    Resent:  {}", report.chunks_resent);
    }
    if report.entries_extracted > 0 {
        println!("    Entries: {} extracted", report.entries_extracted);
    }
    println!();
}

/// Parse a human size like `5MB`, `512KB` or a plain byte count.
fn parse_size(input: &str) -> Result<usize, String> {
    let upper = input.trim().to_uppercase();
    let (num_part, unit) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1)
    } else {
        (upper.as_str(), 1)
    };

    let num: usize = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{input}': {e}"))?;
    num.checked_mul(unit)
        .ok_or_else(|| format!("size '{input}' is too large"))
}
