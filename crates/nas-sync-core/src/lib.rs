//! # nas-sync Core Library
//!
//! `nas-sync-core` moves a local file or directory tree into a remote NAS
//! volume that is only reachable through a stateless HTTP proxy function.
//!
//! ## Features
//!
//! - **Archive once**: directories travel as a single deflated zip
//! - **Resumable**: the remote side reports which chunks it already holds
//! - **Verified**: every chunk and the merged payload are SHA-256 checked
//! - **Bounded**: uploads and extraction batches run with a fixed width
//!
//! ## Modules
//!
//! - [`archive`] - Packing sources into a transferable payload
//! - [`chunk`] - Splitting payloads into digested parts
//! - [`client`] - Typed calls for each protocol operation
//! - [`config`] - Configuration management
//! - [`digest`] - SHA-256 helpers
//! - [`protocol`] - Wire types and routes
//! - [`sync`] - Upload coordinator and unzip batcher
//! - [`transport`] - Request/response collaborator and its HTTP implementation
//! - [`server`] - Remote assembler served over HTTP
//!
//! ## Example
//!
//! ```rust,ignore
//! use nas_sync_core::sync::{SyncOptions, SyncSession};
//! use nas_sync_core::transport::HttpTransport;
//!
//! let transport = HttpTransport::new("https://proxy.example.com/nas", timeout)?;
//! let session = SyncSession::new(transport, SyncOptions::default());
//! let report = session.run("./site".as_ref(), "/mnt/nas/www/").await?;
//! println!("{} chunks uploaded", report.chunks_uploaded);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod archive;
pub mod chunk;
pub mod client;
pub mod config;
pub mod digest;
pub mod error;
pub mod protocol;
pub mod sync;
pub mod transport;

#[cfg(feature = "server")]
pub mod server;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol version, compared by major/minor compatibility
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Default chunk size for uploads (5 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Default number of concurrent chunk uploads and unzip batches
pub const DEFAULT_PARALLEL_UPLOADS: usize = 4;

/// Default number of archive entries per unzip batch
pub const DEFAULT_UNZIP_BATCH_SIZE: usize = 500;

/// Default per-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 600;

/// Default upper bound for a rendered extraction command line (128 KiB)
pub const DEFAULT_MAX_COMMAND_BYTES: usize = 128 * 1024;

/// Default upper bound for a single chunk request body (16 MiB)
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 16 * 1024 * 1024;

/// Default age after which abandoned remote sessions are removed (7 days)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default server bind address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";

/// Name of the directory holding remote sessions
pub const TEMP_DIR_NAME: &str = ".nas_sync_tmp";

/// Prefix of generated archive names
pub const ARCHIVE_PREFIX: &str = ".";

/// Suffix of generated archive names
pub const ARCHIVE_SUFFIX: &str = ".zip";
