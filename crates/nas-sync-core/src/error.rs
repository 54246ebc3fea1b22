//! Error types for nas-sync.
//!
//! This module provides a unified error type for all nas-sync operations,
//! with specific error variants for the ways a sync can fail.

use std::io;

use thiserror::Error;

use crate::sync::SyncPhase;

/// A specialized `Result` type for nas-sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for nas-sync.
#[derive(Error, Debug)]
pub enum Error {
    /// Local source or remote session does not exist (E101)
    #[error("not found: {0}")]
    NotFound(String),

    /// Payload kind is incompatible with the remote destination (E102)
    #[error("destination conflict at '{path}': {reason}")]
    DestinationConflict {
        /// Remote destination path
        path: String,
        /// Why the destination was rejected
        reason: String,
    },

    /// A chunk was refused twice by the remote side (E103)
    #[error("chunk '{chunk}' failed digest verification after resend")]
    ChunkDigestMismatch {
        /// Chunk name
        chunk: String,
    },

    /// Whole-payload digest did not match at merge time (E104)
    #[error("corrupted transfer: {0}")]
    CorruptedTransfer(String),

    /// A single archive entry could not be extracted (E105)
    #[error("failed to extract '{entry}': {reason}")]
    Extraction {
        /// Archive entry name
        entry: String,
        /// Extraction tool output
        reason: String,
    },

    /// Network failure or non-success status from the proxy (E106)
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation timeout (E107)
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// Invalid path (E108)
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A terminal error annotated with the phase it happened in
    #[error("{phase} failed: {source}")]
    Phase {
        /// Phase that failed
        phase: SyncPhase,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Archive could not be written or read
    #[error("archive error: {0}")]
    Archive(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::NotFound(_) => Some("E101"),
            Self::DestinationConflict { .. } => Some("E102"),
            Self::ChunkDigestMismatch { .. } => Some("E103"),
            Self::CorruptedTransfer(_) => Some("E104"),
            Self::Extraction { .. } => Some("E105"),
            Self::Transport(_) => Some("E106"),
            Self::Timeout(_) => Some("E107"),
            Self::InvalidPath(_) => Some("E108"),
            Self::Phase { source, .. } => source.code(),
            _ => None,
        }
    }

    /// Returns whether this error is recoverable (can be retried).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Phase { source, .. } => source.is_recoverable(),
            other => matches!(
                other,
                Self::Transport(_) | Self::Timeout(_) | Self::ChunkDigestMismatch { .. }
            ),
        }
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Phase { source, .. } => source.suggestion(),
            Self::CorruptedTransfer(_) => Some(
                "The remote session was discarded. Re-run the sync to transfer from scratch.",
            ),
            Self::ChunkDigestMismatch { .. } | Self::Transport(_) | Self::Timeout(_) => Some(
                "Chunks already stored remotely are kept. Re-run the sync to resume.",
            ),
            Self::DestinationConflict { .. } => Some(
                "Pick a destination directory, or remove the trailing slash to copy onto a file.",
            ),
            _ => None,
        }
    }

    /// Attach the phase this error terminated.
    #[must_use]
    pub fn in_phase(self, phase: SyncPhase) -> Self {
        match self {
            already @ Self::Phase { .. } => already,
            other => Self::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// The phase this error terminated, if it was annotated with one.
    #[must_use]
    pub const fn phase(&self) -> Option<SyncPhase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The underlying error with any phase annotation removed.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Phase { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Self::Io(e),
            other => Self::Archive(other.to_string()),
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.display().to_string());
        match err.into_io_error() {
            Some(io_err) => Self::Io(io_err),
            None => Self::Archive(format!(
                "filesystem loop while walking {}",
                path.unwrap_or_default()
            )),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {err}"))
    }
}
