//! Batched remote extraction with failure bisection.
//!
//! Entries are sent in batches of `batch_size`. A failed batch with more than
//! one entry is split in half and both halves go to the front of the queue,
//! so a single bad entry costs `O(log batch_size)` extra requests. A failed
//! single-entry batch is terminal for that entry only; other batches keep
//! going and the run ends once the queue drains.

use serde::Serialize;
use tokio::sync::watch;

use crate::client::ProxyClient;
use crate::protocol::UnzipRequest;
use crate::transport::Transport;

use super::pool::{BoundedQueue, Next};
use super::progress::SyncProgress;

/// An entry that could not be extracted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionFailure {
    /// Archive entry name
    pub entry: String,
    /// Output of the last attempt
    pub reason: String,
}

/// Outcome of an unzip run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnzipReport {
    /// Entries extracted successfully
    pub extracted: Vec<String>,
    /// Entries that failed in a single-entry batch
    pub failures: Vec<ExtractionFailure>,
    /// Requests sent, including bisection retries
    pub requests: usize,
}

impl UnzipReport {
    /// Whether every entry was extracted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Split a failed batch into two halves; the first half gets the extra entry.
#[must_use]
pub fn split_batch(mut batch: Vec<String>) -> (Vec<String>, Vec<String>) {
    let second = batch.split_off(batch.len().div_ceil(2));
    (batch, second)
}

/// Extracts archive entries remotely in bounded, bisecting batches.
#[derive(Debug)]
pub struct UnzipBatcher<'a, T> {
    client: &'a ProxyClient<T>,
    batch_size: usize,
    parallelism: usize,
    overwrite: bool,
    progress: Option<&'a watch::Sender<SyncProgress>>,
}

impl<'a, T: Transport> UnzipBatcher<'a, T> {
    /// Create a batcher. Zero sizes are treated as one.
    #[must_use]
    pub fn new(client: &'a ProxyClient<T>, batch_size: usize, parallelism: usize) -> Self {
        Self {
            client,
            batch_size: batch_size.max(1),
            parallelism: parallelism.max(1),
            overwrite: true,
            progress: None,
        }
    }

    /// Whether existing files are replaced.
    #[must_use]
    pub const fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Publish extracted-entry counts on a progress channel.
    #[must_use]
    pub const fn with_progress(mut self, progress: &'a watch::Sender<SyncProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Extract `entries` of the remote `archive_path` into `dest_dir`.
    pub async fn run(&self, archive_path: &str, dest_dir: &str, entries: &[String]) -> UnzipReport {
        let batches: Vec<Vec<String>> = entries
            .chunks(self.batch_size)
            .map(<[String]>::to_vec)
            .collect();
        let mut report = UnzipReport::default();

        tracing::debug!(
            entries = entries.len(),
            batches = batches.len(),
            batch_size = self.batch_size,
            "Starting extraction"
        );

        BoundedQueue::with_items(self.parallelism, batches)
            .drive(
                |batch: Vec<String>| async move {
                    let request = UnzipRequest {
                        archive_path: archive_path.to_string(),
                        dest_dir: dest_dir.to_string(),
                        entries: batch.clone(),
                        overwrite: self.overwrite,
                    };
                    let outcome = match self.client.unzip_batch(&request).await {
                        Ok(output) if output.success => Ok(()),
                        Ok(output) => Err(output.failure_reason()),
                        Err(e) => Err(e.to_string()),
                    };
                    (batch, outcome)
                },
                |(batch, outcome), requeue| {
                    report.requests += 1;
                    match outcome {
                        Ok(()) => {
                            if let Some(progress) = self.progress {
                                progress.send_modify(|p| p.entries_extracted += batch.len());
                            }
                            report.extracted.extend(batch);
                        }
                        Err(reason) if batch.len() > 1 => {
                            tracing::debug!(
                                entries = batch.len(),
                                %reason,
                                "Unzip batch failed, bisecting"
                            );
                            let (first, second) = split_batch(batch);
                            requeue.push_front_all([first, second]);
                        }
                        Err(reason) => {
                            let entry = batch.into_iter().next().unwrap_or_default();
                            tracing::warn!(%entry, %reason, "Entry could not be extracted");
                            report.failures.push(ExtractionFailure { entry, reason });
                        }
                    }
                    Next::Continue
                },
            )
            .await;

        report
    }
}
