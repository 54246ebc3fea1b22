//! Client-side sync engine.
//!
//! [`SyncSession`] moves one local source to one remote destination:
//!
//! 1. pack the source and digest it
//! 2. stat the destination and negotiate a session
//! 3. split into chunks and skip those the remote side already verified
//! 4. upload the rest with bounded concurrency, resending each failure once
//! 5. merge, verifying the whole-payload digest remotely
//! 6. extract directory archives in bisecting batches
//!
//! Whatever happens, `clean` is sent exactly once and the local workspace is
//! removed before [`SyncSession::run`] returns.

pub mod pool;
pub mod progress;
pub mod unzip;

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::watch;

use crate::archive::{Archiver, Payload, PayloadKind};
use crate::chunk::{Chunk, Chunker};
use crate::client::ProxyClient;
use crate::config::ClientConfig;
use crate::digest::digest_bytes;
use crate::error::{Error, Result};
use crate::protocol::{remote_join, CleanQuery, MergeQuery, NegotiateQuery, TransferManifest};
use crate::transport::Transport;

pub use pool::{BoundedQueue, DriveStats, Next};
pub use progress::{SyncPhase, SyncProgress};
pub use unzip::{ExtractionFailure, UnzipBatcher, UnzipReport};

/// Tunables for one sync.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// Concurrent uploads and unzip batches
    pub parallel_uploads: usize,
    /// Entries per unzip request
    pub unzip_batch_size: usize,
    /// Replace existing files on extraction
    pub overwrite: bool,
    /// Compare protocol versions first
    pub check_version: bool,
    /// Parent directory of the local workspace
    pub local_temp_dir: Option<PathBuf>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for SyncOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            parallel_uploads: config.parallel_uploads,
            unzip_batch_size: config.unzip_batch_size,
            overwrite: config.overwrite,
            check_version: config.check_version,
            local_temp_dir: config.local_temp_dir.clone(),
        }
    }
}

/// Summary of a completed sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Source kind
    pub kind: PayloadKind,
    /// Whole-payload digest
    pub digest: String,
    /// Payload size in bytes
    pub size: u64,
    /// Final remote location: the file, or the extraction directory
    pub remote_path: String,
    /// Chunks in the payload
    pub chunks_total: usize,
    /// Chunks sent in this run
    pub chunks_uploaded: usize,
    /// Chunks the remote side already held
    pub chunks_skipped: usize,
    /// Chunk sends beyond the first attempt
    pub chunks_resent: usize,
    /// Archive entries extracted
    pub entries_extracted: usize,
}

/// Chunks that still need uploading given what the remote side reports.
///
/// A chunk is skipped only when both its name and its digest match.
#[must_use]
pub fn pending_chunks(chunks: &[Chunk], manifest: &TransferManifest) -> (Vec<Chunk>, usize) {
    let mut skipped = 0;
    let pending = chunks
        .iter()
        .filter(|chunk| {
            let held = manifest.uploaded_chunks.get(&chunk.name) == Some(&chunk.digest);
            if held {
                skipped += 1;
            }
            !held
        })
        .cloned()
        .collect();
    (pending, skipped)
}

/// Check a stat result against the payload before any chunk work.
///
/// # Errors
///
/// Returns `DestinationConflict` for a directory onto an existing file, or a
/// trailing-slash destination that is an existing file.
pub fn check_destination(
    dst_path: &str,
    is_dir: bool,
    stat: &crate::protocol::RemotePathStat,
) -> Result<()> {
    if !stat.is_file {
        return Ok(());
    }
    let reason = if is_dir {
        "cannot copy a directory onto an existing file"
    } else if dst_path.ends_with('/') {
        "not a directory"
    } else {
        return Ok(());
    };
    Err(Error::DestinationConflict {
        path: dst_path.to_string(),
        reason: reason.to_string(),
    })
}

/// Remote state `clean` should remove.
#[derive(Debug, Default)]
struct CleanupTarget {
    temp_dir: Option<String>,
    merged_path: Option<String>,
}

struct UploadOutcome {
    uploaded: usize,
    resent: usize,
}

/// Drives one local source to one remote destination.
#[derive(Debug)]
pub struct SyncSession<T> {
    client: ProxyClient<T>,
    options: SyncOptions,
    progress: watch::Sender<SyncProgress>,
}

impl<T: Transport> SyncSession<T> {
    /// Create a session over `transport`.
    #[must_use]
    pub fn new(transport: T, options: SyncOptions) -> Self {
        let (progress, _) = watch::channel(SyncProgress::default());
        Self {
            client: ProxyClient::new(transport),
            options,
            progress,
        }
    }

    /// Subscribe to progress updates.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// The typed client this session uses.
    #[must_use]
    pub const fn client(&self) -> &ProxyClient<T> {
        &self.client
    }

    /// Options this session was built with.
    #[must_use]
    pub const fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Sync `source` to the remote `dst_path`.
    ///
    /// # Errors
    ///
    /// Returns the first terminal error, wrapped in [`Error::Phase`] naming
    /// the phase it ended.
    pub async fn run(&self, source: &Path, dst_path: &str) -> Result<SyncReport> {
        let mut cleanup = CleanupTarget::default();

        let result = match self.create_workspace() {
            Ok(workspace) => {
                let result = self
                    .run_phases(source, dst_path, workspace.path(), &mut cleanup)
                    .await;
                if let Err(e) = workspace.close() {
                    tracing::warn!(error = %e, "Failed to remove local workspace");
                }
                result
            }
            Err(e) => Err(e.in_phase(SyncPhase::Pack)),
        };

        self.set_phase(SyncPhase::Clean);
        self.clean(&cleanup).await;

        match &result {
            Ok(report) => {
                self.set_phase(SyncPhase::Done);
                tracing::info!(
                    remote = %report.remote_path,
                    uploaded = report.chunks_uploaded,
                    skipped = report.chunks_skipped,
                    "Sync complete"
                );
            }
            Err(e) => tracing::warn!(error = %e, "Sync failed"),
        }

        result
    }

    async fn run_phases(
        &self,
        source: &Path,
        dst_path: &str,
        workspace: &Path,
        cleanup: &mut CleanupTarget,
    ) -> Result<SyncReport> {
        let chunker = Chunker::new(self.options.chunk_size).map_err(|e| e.in_phase(SyncPhase::Pack))?;

        if self.options.check_version {
            self.check_version().await;
        }

        self.set_phase(SyncPhase::Pack);
        let payload = Archiver::pack(source, workspace)
            .await
            .map_err(|e| e.in_phase(SyncPhase::Pack))?;

        self.set_phase(SyncPhase::Negotiate);
        let manifest = self
            .negotiate(&payload, dst_path)
            .await
            .map_err(|e| e.in_phase(SyncPhase::Negotiate))?;
        cleanup.temp_dir = Some(manifest.remote_temp_dir.clone());

        self.set_phase(SyncPhase::Upload);
        let chunks = chunker
            .split(&payload.path, &payload.file_name, &workspace.join("chunks"))
            .await
            .map_err(|e| e.in_phase(SyncPhase::Upload))?;
        let (pending, skipped) = pending_chunks(&chunks, &manifest);
        let skipped_bytes: u64 = chunks.iter().map(|c| c.len).sum::<u64>()
            - pending.iter().map(|c| c.len).sum::<u64>();

        self.progress.send_modify(|p| {
            p.chunks_total = chunks.len();
            p.chunks_done = skipped;
            p.chunks_skipped = skipped;
            p.bytes_total = payload.size;
            p.bytes_done = skipped_bytes;
        });

        tracing::info!(
            digest = %payload.digest,
            chunks = chunks.len(),
            skipped,
            "Uploading payload"
        );

        let upload = self
            .upload(&manifest.remote_temp_dir, pending)
            .await
            .map_err(|e| e.in_phase(SyncPhase::Upload))?;

        self.set_phase(SyncPhase::Merge);
        let merged_path = self
            .merge(&payload, &manifest)
            .await
            .map_err(|e| e.in_phase(SyncPhase::Merge))?;

        let mut report = SyncReport {
            kind: payload.kind,
            digest: payload.digest.clone(),
            size: payload.size,
            remote_path: merged_path.clone(),
            chunks_total: chunks.len(),
            chunks_uploaded: upload.uploaded,
            chunks_skipped: skipped,
            chunks_resent: upload.resent,
            entries_extracted: 0,
        };

        if payload.is_dir() {
            cleanup.merged_path = Some(merged_path.clone());

            self.set_phase(SyncPhase::Extract);
            let dest_dir = remote_join(&manifest.dst_dir, &manifest.dst_name);
            let unzip = self.extract(&payload, &merged_path, &dest_dir).await;
            if let Some(failure) = unzip.failures.into_iter().next() {
                return Err(Error::Extraction {
                    entry: failure.entry,
                    reason: failure.reason,
                }
                .in_phase(SyncPhase::Extract));
            }

            report.entries_extracted = unzip.extracted.len();
            report.remote_path = dest_dir;
        }

        Ok(report)
    }

    async fn check_version(&self) {
        match self.client.check_version().await {
            Ok(status) if status.compatible => tracing::debug!(
                remote = %status.remote,
                server = %status.server_version,
                "Protocol versions compatible"
            ),
            Ok(status) => tracing::warn!(
                local = %status.local,
                remote = %status.remote,
                "Remote protocol version differs, continuing anyway"
            ),
            Err(e) => tracing::warn!(error = %e, "Could not check remote version"),
        }
    }

    async fn negotiate(&self, payload: &Payload, dst_path: &str) -> Result<TransferManifest> {
        let stat = self.client.stat(dst_path).await?;
        check_destination(dst_path, payload.is_dir(), &stat)?;

        let manifest = self
            .client
            .negotiate(&NegotiateQuery {
                dst_path: dst_path.to_string(),
                digest: payload.digest.clone(),
                file_name: payload.file_name.clone(),
                is_dir: payload.is_dir(),
                trailing_slash: dst_path.ends_with('/'),
            })
            .await?;

        tracing::debug!(
            temp_dir = %manifest.remote_temp_dir,
            dst_dir = %manifest.dst_dir,
            dst_name = %manifest.dst_name,
            held = manifest.uploaded_chunks.len(),
            "Negotiated session"
        );

        Ok(manifest)
    }

    async fn upload(&self, temp_dir: &str, pending: Vec<Chunk>) -> Result<UploadOutcome> {
        let mut outcome = UploadOutcome {
            uploaded: 0,
            resent: 0,
        };
        let mut fatal = None;

        BoundedQueue::with_items(
            self.options.parallel_uploads,
            pending.into_iter().map(|chunk| (chunk, 0u8)),
        )
        .drive(
            |(chunk, attempt)| async move {
                let result = self.send_chunk(temp_dir, &chunk).await;
                (chunk, attempt, result)
            },
            |(chunk, attempt, result), requeue| match result {
                Ok(()) => {
                    outcome.uploaded += 1;
                    self.progress.send_modify(|p| {
                        p.chunks_done += 1;
                        p.bytes_done += chunk.len;
                    });
                    Next::Continue
                }
                Err(e) if attempt == 0 => {
                    tracing::debug!(chunk = %chunk.name, error = %e, "Chunk failed, resending");
                    outcome.resent += 1;
                    requeue.push_back((chunk, 1));
                    Next::Continue
                }
                Err(e) => {
                    tracing::warn!(chunk = %chunk.name, error = %e, "Chunk failed after resend");
                    fatal = Some(e);
                    Next::Cancel
                }
            },
        )
        .await;

        match fatal {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    async fn send_chunk(&self, temp_dir: &str, chunk: &Chunk) -> Result<()> {
        let data = tokio::fs::read(&chunk.path).await?;
        if digest_bytes(&data) != chunk.digest {
            return Err(Error::ChunkDigestMismatch {
                chunk: chunk.name.clone(),
            });
        }

        let ack = self.client.upload_chunk(temp_dir, chunk, data).await?;
        if ack.ok {
            return Ok(());
        }

        tracing::debug!(
            chunk = %chunk.name,
            reason = ack.reason.as_deref().unwrap_or("unspecified"),
            "Chunk refused"
        );
        Err(Error::ChunkDigestMismatch {
            chunk: chunk.name.clone(),
        })
    }

    async fn merge(&self, payload: &Payload, manifest: &TransferManifest) -> Result<String> {
        let ack = self
            .client
            .merge(&MergeQuery {
                temp_dir: manifest.remote_temp_dir.clone(),
                dst_dir: manifest.dst_dir.clone(),
                dst_name: manifest.dst_name.clone(),
                file_name: payload.file_name.clone(),
                digest: payload.digest.clone(),
                is_dir: payload.is_dir(),
                mode: payload.mode,
            })
            .await?;

        if !ack.ok {
            return Err(Error::CorruptedTransfer(
                ack.reason.unwrap_or_else(|| "merge refused".to_string()),
            ));
        }

        ack.merged_path
            .ok_or_else(|| Error::ProtocolError("merge response without merged_path".to_string()))
    }

    async fn extract(&self, payload: &Payload, archive_path: &str, dest_dir: &str) -> UnzipReport {
        self.progress.send_modify(|p| p.entries_total = payload.entries.len());

        UnzipBatcher::new(
            &self.client,
            self.options.unzip_batch_size,
            self.options.parallel_uploads,
        )
        .overwrite(self.options.overwrite)
        .with_progress(&self.progress)
        .run(archive_path, dest_dir, &payload.entries)
        .await
    }

    async fn clean(&self, target: &CleanupTarget) {
        let query = CleanQuery {
            merged_path: target.merged_path.clone(),
            temp_dir: target.temp_dir.clone(),
        };

        match self.client.clean(&query).await {
            Ok(ack) => tracing::debug!(removed = ?ack.removed, "Cleaned remote temporaries"),
            Err(e) => tracing::warn!(error = %e, "Failed to clean remote temporaries"),
        }
    }

    fn create_workspace(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".nas-sync-");
        let workspace = match &self.options.local_temp_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };
        Ok(workspace)
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.progress.send_modify(|p| p.phase = phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RemotePathStat;
    use std::collections::BTreeMap;

    fn chunk(index: u64, digest: &str) -> Chunk {
        Chunk {
            index,
            offset: index * 10,
            len: 10,
            digest: digest.to_string(),
            name: crate::chunk::chunk_name(".site.zip", index),
            path: PathBuf::from(format!("/tmp/.site.zip.part-{index}")),
        }
    }

    #[test]
    fn test_pending_chunks_requires_name_and_digest() {
        let chunks = vec![chunk(0, "aa"), chunk(1, "bb"), chunk(2, "cc")];
        let manifest = TransferManifest {
            uploaded_chunks: BTreeMap::from([
                (".site.zip.part-0".to_string(), "aa".to_string()),
                (".site.zip.part-1".to_string(), "stale".to_string()),
                (".other.zip.part-2".to_string(), "cc".to_string()),
            ]),
            ..Default::default()
        };

        let (pending, skipped) = pending_chunks(&chunks, &manifest);

        assert_eq!(skipped, 1);
        assert_eq!(
            pending.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_check_destination() {
        let file = RemotePathStat {
            exists: true,
            is_file: true,
            parent_dir_exists: true,
            ..Default::default()
        };
        let dir = RemotePathStat {
            exists: true,
            is_dir: true,
            parent_dir_exists: true,
            ..Default::default()
        };

        assert!(matches!(
            check_destination("/mnt/a.txt", true, &file),
            Err(Error::DestinationConflict { .. })
        ));
        assert!(matches!(
            check_destination("/mnt/a.txt/", false, &file),
            Err(Error::DestinationConflict { .. })
        ));
        assert!(check_destination("/mnt/a.txt", false, &file).is_ok());
        assert!(check_destination("/mnt/www", true, &dir).is_ok());
        assert!(check_destination("/mnt/new/", true, &RemotePathStat::default()).is_ok());
    }

    #[test]
    fn test_options_from_config() {
        let config = ClientConfig {
            chunk_size: 1024,
            parallel_uploads: 2,
            overwrite: false,
            ..Default::default()
        };
        let options = SyncOptions::from(&config);
        assert_eq!(options.chunk_size, 1024);
        assert_eq!(options.parallel_uploads, 2);
        assert!(!options.overwrite);
        assert_eq!(options.unzip_batch_size, crate::DEFAULT_UNZIP_BATCH_SIZE);
    }
}
