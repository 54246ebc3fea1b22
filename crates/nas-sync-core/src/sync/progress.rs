//! Sync phases and the progress snapshot published while a sync runs.

use serde::{Deserialize, Serialize};

/// The step a sync is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// Not started
    #[default]
    Idle,
    /// Building the payload
    Pack,
    /// Stat and negotiation
    Negotiate,
    /// Sending chunks
    Upload,
    /// Remote concatenation and verification
    Merge,
    /// Batched extraction
    Extract,
    /// Removing remote and local temporaries
    Clean,
    /// Finished successfully
    Done,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Pack => "pack",
            Self::Negotiate => "negotiate",
            Self::Upload => "upload",
            Self::Merge => "merge",
            Self::Extract => "extract",
            Self::Clean => "clean",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Snapshot of a running sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    /// Current phase
    pub phase: SyncPhase,
    /// Chunks in the payload
    pub chunks_total: usize,
    /// Chunks acknowledged, including skipped ones
    pub chunks_done: usize,
    /// Chunks the remote side already held
    pub chunks_skipped: usize,
    /// Payload size
    pub bytes_total: u64,
    /// Bytes acknowledged, including skipped chunks
    pub bytes_done: u64,
    /// Archive entries to extract
    pub entries_total: usize,
    /// Archive entries extracted so far
    pub entries_extracted: usize,
}

impl SyncProgress {
    /// Fraction of chunk bytes acknowledged, in `0.0..=1.0`.
    #[must_use]
    pub fn upload_fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            return if self.phase == SyncPhase::Idle { 0.0 } else { 1.0 };
        }
        self.bytes_done as f64 / self.bytes_total as f64
    }
}
