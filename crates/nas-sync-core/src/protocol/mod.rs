//! Wire types for the proxy protocol.
//!
//! Every operation is one stateless HTTP call. Scalar parameters travel as
//! query parameters, chunk bytes as a raw octet-stream body, and the unzip
//! request as a JSON body. Every response body is JSON.
//!
//! ## Operations
//!
//! | Operation | Route | Response |
//! |-----------|-------|----------|
//! | stat | `GET /stats` | [`RemotePathStat`] |
//! | negotiate | `GET /session/negotiate` | [`TransferManifest`] |
//! | upload chunk | `POST /session/chunk` | [`ChunkAck`] |
//! | merge | `POST /session/merge` | [`MergeAck`] |
//! | unzip batch | `POST /unzip` | [`CommandOutput`] |
//! | clean | `POST /clean` | [`CleanAck`] |
//! | version | `GET /version` | [`VersionInfo`] |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// HTTP method of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

impl Method {
    /// Upper-case method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Operations exposed by the remote assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Inspect a remote path
    Stat,
    /// Create or resume a session
    Negotiate,
    /// Store one chunk
    UploadChunk,
    /// Concatenate and verify chunks
    Merge,
    /// Extract a batch of archive entries
    UnzipBatch,
    /// Remove session and merged archive
    Clean,
    /// Report server and protocol versions
    Version,
}

impl Operation {
    /// Route of this operation relative to the service base URL.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Stat => "/stats",
            Self::Negotiate => "/session/negotiate",
            Self::UploadChunk => "/session/chunk",
            Self::Merge => "/session/merge",
            Self::UnzipBatch => "/unzip",
            Self::Clean => "/clean",
            Self::Version => "/version",
        }
    }

    /// HTTP method of this operation.
    #[must_use]
    pub const fn method(self) -> Method {
        match self {
            Self::Stat | Self::Negotiate | Self::Version => Method::Get,
            Self::UploadChunk | Self::Merge | Self::UnzipBatch | Self::Clean => Method::Post,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stat => "stat",
            Self::Negotiate => "negotiate",
            Self::UploadChunk => "upload chunk",
            Self::Merge => "merge",
            Self::UnzipBatch => "unzip batch",
            Self::Clean => "clean",
            Self::Version => "version",
        };
        f.write_str(name)
    }
}

/// Query for [`Operation::Stat`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatQuery {
    /// Remote path to inspect
    pub dst_path: String,
}

/// What the remote side knows about a path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePathStat {
    /// Path that was inspected
    pub path: String,
    /// Whether anything exists at the path
    pub exists: bool,
    /// Whether the parent directory exists
    pub parent_dir_exists: bool,
    /// Whether the path is a directory
    pub is_dir: bool,
    /// Whether the path is a regular file
    pub is_file: bool,
}

/// Query for [`Operation::Negotiate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiateQuery {
    /// Remote destination as given by the user
    pub dst_path: String,
    /// Whole-payload digest, also the session key
    pub digest: String,
    /// Payload name
    pub file_name: String,
    /// Whether the payload is a directory archive
    pub is_dir: bool,
    /// Whether the destination was given with a trailing slash
    pub trailing_slash: bool,
}

/// Session details returned by negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferManifest {
    /// Remote session directory
    pub remote_temp_dir: String,
    /// Resolved destination directory
    pub dst_dir: String,
    /// Resolved destination name
    pub dst_name: String,
    /// Verified chunks already held remotely, by name
    #[serde(default)]
    pub uploaded_chunks: BTreeMap<String, String>,
}

/// Query for [`Operation::UploadChunk`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkQuery {
    /// Remote session directory
    pub temp_dir: String,
    /// Chunk name
    pub chunk_name: String,
    /// Expected digest of the body
    pub digest: String,
}

/// Acknowledgement of a stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAck {
    /// Whether the chunk was stored
    pub ok: bool,
    /// Why the chunk was refused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ChunkAck {
    /// A positive acknowledgement.
    #[must_use]
    pub const fn accepted() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    /// A refusal with a reason.
    #[must_use]
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// Query for [`Operation::Merge`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeQuery {
    /// Remote session directory
    pub temp_dir: String,
    /// Resolved destination directory
    pub dst_dir: String,
    /// Resolved destination name
    pub dst_name: String,
    /// Payload name
    pub file_name: String,
    /// Expected whole-payload digest
    pub digest: String,
    /// Whether the payload is a directory archive
    pub is_dir: bool,
    /// Permission bits for a file payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
}

/// Result of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeAck {
    /// Whether the merged payload verified
    pub ok: bool,
    /// Where the merged payload now lives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_path: Option<String>,
    /// Why the merge was refused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MergeAck {
    /// A successful merge.
    #[must_use]
    pub fn merged(path: impl Into<String>) -> Self {
        Self {
            ok: true,
            merged_path: Some(path.into()),
            reason: None,
        }
    }

    /// A refused merge.
    #[must_use]
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            merged_path: None,
            reason: Some(reason.into()),
        }
    }
}

/// Body of [`Operation::UnzipBatch`].
///
/// The server builds the extraction command from these fields; clients never
/// send command text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnzipRequest {
    /// Merged archive on the remote volume
    pub archive_path: String,
    /// Directory to extract into
    pub dest_dir: String,
    /// Entry names to extract
    pub entries: Vec<String>,
    /// Replace existing files
    pub overwrite: bool,
}

/// Outcome of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Whether the command succeeded
    pub success: bool,
    /// Exit code, if the command ran to completion
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Captured standard output
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error
    #[serde(default)]
    pub stderr: String,
}

impl CommandOutput {
    /// A failed command that never produced output of its own.
    #[must_use]
    pub fn failed(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// The most useful single-line description of a failure.
    #[must_use]
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        self.exit_code.map_or_else(
            || "command did not complete".to_string(),
            |code| format!("exit code {code}"),
        )
    }
}

/// Query for [`Operation::Clean`]. Both fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanQuery {
    /// Merged archive to remove
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_path: Option<String>,
    /// Session directory to remove
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<String>,
}

/// Result of a clean.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanAck {
    /// Paths that were actually removed
    #[serde(default)]
    pub removed: Vec<String>,
}

/// Server version report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Server crate version
    pub version: String,
    /// Wire protocol version
    pub protocol: String,
}

/// Flatten a serializable struct into query pairs.
///
/// `None` fields are omitted; scalars are rendered with their JSON text.
///
/// # Errors
///
/// Returns `Serialization` if the value is not a flat struct.
pub fn query_pairs<T: Serialize>(value: &T) -> Result<Vec<(String, String)>> {
    let serde_json::Value::Object(map) = serde_json::to_value(value)? else {
        return Err(Error::Serialization(
            "query parameters must be a struct".to_string(),
        ));
    };

    map.into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => Ok((k, s)),
            serde_json::Value::Bool(b) => Ok((k, b.to_string())),
            serde_json::Value::Number(n) => Ok((k, n.to_string())),
            _ => Err(Error::Serialization(format!(
                "query parameter '{k}' is not a scalar"
            ))),
        })
        .collect()
}

/// Join a remote directory and a name with exactly one `/`.
#[must_use]
pub fn remote_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}
