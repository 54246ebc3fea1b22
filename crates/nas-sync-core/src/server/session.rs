//! Remote chunk assembly.
//!
//! Every session lives on disk in `<temp_root>/<payload digest>` so any
//! request can be served by a fresh process. The directory holds:
//!
//! - `session.json`: payload name, kind, resolved destination and state
//! - `<payload>.part-<n>`: verified chunk files
//! - `<payload>.part-<n>.sha256`: the digest each chunk verified against
//!
//! A chunk only gets its final name after its bytes matched the digest the
//! client sent, and its sidecar is written after that. A chunk without a
//! matching sidecar is never reported to clients.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::archive::{is_archive_name, PayloadKind};
use crate::chunk::parse_chunk_index;
use crate::config::{ExtractBackend, ServerConfig};
use crate::digest::{digest_bytes, digest_file, is_digest};
use crate::error::{Error, Result};
use crate::protocol::{
    ChunkAck, ChunkQuery, CleanAck, CleanQuery, CommandOutput, MergeAck, MergeQuery,
    NegotiateQuery, RemotePathStat, TransferManifest, UnzipRequest, VersionInfo,
};

use super::destination::{resolve_destination, stat_path, Destination};
use super::extract;

/// Session metadata file name.
pub const SESSION_FILE: &str = "session.json";

/// Suffix of chunk digest sidecars.
pub const SIDECAR_SUFFIX: &str = ".sha256";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Settings for a [`RemoteAssembler`].
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Directory holding per-digest sessions
    pub temp_root: PathBuf,
    /// How archive entries are extracted
    pub extract_backend: ExtractBackend,
    /// Largest accepted rendered extraction command
    pub max_command_bytes: usize,
    /// Age after which untouched sessions are removed
    pub session_ttl: Duration,
}

impl AssemblerConfig {
    /// Defaults rooted at `temp_root`.
    #[must_use]
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
            ..Self::from(&ServerConfig::default())
        }
    }

    /// Use a different extraction backend.
    #[must_use]
    pub const fn with_backend(mut self, backend: ExtractBackend) -> Self {
        self.extract_backend = backend;
        self
    }
}

impl From<&ServerConfig> for AssemblerConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            temp_root: config.temp_root.clone(),
            extract_backend: config.extract_backend,
            max_command_bytes: config.max_command_bytes,
            session_ttl: config.session_ttl,
        }
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created or resumed, no chunk stored in this round yet
    Negotiated,
    /// At least one chunk stored
    Receiving,
}

/// Persisted session metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Whole-payload digest
    pub digest: String,
    /// Payload name
    pub file_name: String,
    /// Payload kind
    pub kind: PayloadKind,
    /// Resolved destination
    pub destination: Destination,
    /// Lifecycle state
    pub state: SessionState,
    /// When the session was first negotiated
    pub created_at: DateTime<Utc>,
    /// Last negotiation or chunk
    pub updated_at: DateTime<Utc>,
}

/// Assembles uploaded chunks into payloads on the remote volume.
#[derive(Debug, Clone)]
pub struct RemoteAssembler {
    config: AssemblerConfig,
}

impl RemoteAssembler {
    /// Create an assembler.
    #[must_use]
    pub const fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Assembler settings.
    #[must_use]
    pub const fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Session directory for a payload digest.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if `digest` is not a hex SHA-256 digest.
    pub fn session_dir(&self, digest: &str) -> Result<PathBuf> {
        if !is_digest(digest) {
            return Err(Error::ProtocolError(format!("invalid digest '{digest}'")));
        }
        Ok(self.config.temp_root.join(digest))
    }

    /// Inspect a remote path.
    pub async fn stat(&self, dst_path: &str) -> RemotePathStat {
        stat_path(Path::new(dst_path)).await
    }

    /// Create or resume the session for a payload.
    ///
    /// Chunks left by an earlier attempt are re-hashed; only those matching
    /// their sidecar are reported, the rest are deleted.
    ///
    /// # Errors
    ///
    /// Returns `DestinationConflict` when the payload cannot go to
    /// `dst_path`, `InvalidPath` for malformed names, or an I/O error.
    pub async fn negotiate(&self, query: &NegotiateQuery) -> Result<TransferManifest> {
        let dst = absolute(&query.dst_path)?;
        plain_name(&query.file_name)?;
        let dir = self.session_dir(&query.digest)?;

        let destination =
            resolve_destination(dst, &query.file_name, query.is_dir, query.trailing_slash).await?;

        fs::create_dir_all(&dir).await?;

        let now = Utc::now();
        let kind = if query.is_dir {
            PayloadKind::Directory
        } else {
            PayloadKind::File
        };
        let record = match load_record(&dir).await {
            Some(mut record) => {
                record.file_name.clone_from(&query.file_name);
                record.kind = kind;
                record.destination = destination.clone();
                record.state = SessionState::Negotiated;
                record.updated_at = now;
                record
            }
            None => SessionRecord {
                digest: query.digest.clone(),
                file_name: query.file_name.clone(),
                kind,
                destination: destination.clone(),
                state: SessionState::Negotiated,
                created_at: now,
                updated_at: now,
            },
        };
        save_record(&dir, &record).await?;

        let uploaded_chunks = verified_chunks(&dir, &query.file_name).await?;

        tracing::info!(
            digest = %query.digest,
            target = %destination.target().display(),
            held = uploaded_chunks.len(),
            "Negotiated session"
        );

        Ok(TransferManifest {
            remote_temp_dir: dir.display().to_string(),
            dst_dir: destination.dst_dir.display().to_string(),
            dst_name: destination.dst_name,
            uploaded_chunks,
        })
    }

    /// Verify and store one chunk.
    ///
    /// A digest mismatch is reported in the acknowledgement and leaves
    /// nothing behind.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown session, `InvalidPath` for a chunk
    /// name that does not belong to the session, or an I/O error.
    pub async fn receive_chunk(&self, query: &ChunkQuery, data: &[u8]) -> Result<ChunkAck> {
        let dir = self.resolve_session_dir(&query.temp_dir)?;
        let mut record = load_record(&dir)
            .await
            .ok_or_else(|| Error::NotFound(format!("session {}", query.temp_dir)))?;

        if parse_chunk_index(&record.file_name, &query.chunk_name).is_none() {
            return Err(Error::InvalidPath(format!(
                "'{}' is not a chunk of {}",
                query.chunk_name, record.file_name
            )));
        }

        let actual = digest_bytes(data);
        if actual != query.digest {
            tracing::warn!(
                chunk = %query.chunk_name,
                expected = %query.digest,
                %actual,
                "Chunk digest mismatch"
            );
            return Ok(ChunkAck::refused(format!(
                "digest mismatch: expected {}, got {actual}",
                query.digest
            )));
        }

        let path = dir.join(&query.chunk_name);
        let sidecar = sidecar_path(&path);
        let partial = dir.join(format!(".{}.{}.partial", query.chunk_name, Uuid::new_v4()));

        remove_if_exists(&sidecar).await?;
        let mut file = fs::File::create(&partial).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&partial, &path).await?;
        fs::write(&sidecar, &actual).await?;

        record.state = SessionState::Receiving;
        record.updated_at = Utc::now();
        save_record(&dir, &record).await?;

        tracing::debug!(chunk = %query.chunk_name, bytes = data.len(), "Stored chunk");
        Ok(ChunkAck::accepted())
    }

    /// Concatenate the session's chunks and move the verified payload into
    /// place.
    ///
    /// On a digest mismatch the merged bytes and the whole session are
    /// deleted and the destination is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown session, `InvalidPath` for bad
    /// names, or an I/O error.
    pub async fn merge(&self, query: &MergeQuery) -> Result<MergeAck> {
        let dir = self.resolve_session_dir(&query.temp_dir)?;
        plain_name(&query.file_name)?;
        plain_name(&query.dst_name)?;
        let dst_dir = absolute(&query.dst_dir)?;

        if !fs::try_exists(&dir).await? {
            return Err(Error::NotFound(format!("session {}", query.temp_dir)));
        }

        let chunks = ordered_chunks(&dir, &query.file_name).await?;
        if let Some(missing) = first_gap(&chunks) {
            return Ok(MergeAck::refused(format!("missing chunk {missing}")));
        }

        let merged = dir.join(format!(".merge-{}", Uuid::new_v4()));
        let actual = concat(&chunks, &merged).await?;

        if actual != query.digest {
            tracing::warn!(
                digest = %query.digest,
                %actual,
                "Merged payload failed verification, discarding session"
            );
            fs::remove_dir_all(&dir).await?;
            return Ok(MergeAck::refused(format!(
                "digest mismatch: expected {}, got {actual}",
                query.digest
            )));
        }

        let destination = Destination {
            dst_dir: dst_dir.to_path_buf(),
            dst_name: query.dst_name.clone(),
        };
        let target = if query.is_dir {
            destination.target().join(&query.file_name)
        } else {
            destination.target()
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        move_into_place(&merged, &target).await?;
        if !query.is_dir {
            if let Some(mode) = query.mode {
                apply_mode(&target, mode).await?;
            }
        }
        fs::remove_dir_all(&dir).await?;

        tracing::info!(
            digest = %query.digest,
            chunks = chunks.len(),
            target = %target.display(),
            "Merged payload"
        );

        Ok(MergeAck::merged(target.display().to_string()))
    }

    /// Extract a batch of archive entries.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for relative paths or an error if the backend
    /// cannot be started.
    pub async fn unzip(&self, request: &UnzipRequest) -> Result<CommandOutput> {
        absolute(&request.archive_path)?;
        absolute(&request.dest_dir)?;

        let output = extract::extract(
            self.config.extract_backend,
            request,
            self.config.max_command_bytes,
        )
        .await?;

        if output.success {
            tracing::debug!(entries = request.entries.len(), "Extracted batch");
        } else {
            tracing::debug!(
                entries = request.entries.len(),
                reason = %output.failure_reason(),
                "Extraction batch failed"
            );
        }
        Ok(output)
    }

    /// Remove a session directory and a merged archive. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` if either path is not something this server
    /// created, or an I/O error.
    pub async fn clean(&self, query: &CleanQuery) -> Result<CleanAck> {
        let mut removed = Vec::new();

        if let Some(temp_dir) = &query.temp_dir {
            let dir = self.resolve_session_dir(temp_dir)?;
            match fs::remove_dir_all(&dir).await {
                Ok(()) => removed.push(dir.display().to_string()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(merged_path) = &query.merged_path {
            let path = absolute(merged_path)?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if !is_archive_name(name) {
                return Err(Error::InvalidPath(format!(
                    "refusing to remove {merged_path}: not a generated archive"
                )));
            }
            match fs::remove_file(path).await {
                Ok(()) => removed.push(merged_path.clone()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !removed.is_empty() {
            tracing::debug!(?removed, "Cleaned");
        }
        Ok(CleanAck { removed })
    }

    /// Server and protocol versions.
    #[must_use]
    pub fn version(&self) -> VersionInfo {
        VersionInfo {
            version: crate::VERSION.to_string(),
            protocol: crate::PROTOCOL_VERSION.to_string(),
        }
    }

    /// Remove sessions not touched within the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp root cannot be read.
    pub async fn expire_sessions(&self) -> Result<usize> {
        self.cleanup_older_than(self.config.session_ttl).await
    }

    /// Remove sessions not touched within `max_age`.
    ///
    /// # Returns
    ///
    /// The number of sessions removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp root cannot be read.
    pub async fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age).map_err(|e| Error::InvalidConfig {
            key: "server.session_ttl".to_string(),
            reason: e.to_string(),
        })?;
        let cutoff = Utc::now() - max_age;
        let mut cleaned = 0;

        let mut entries = match fs::read_dir(&self.config.temp_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_digest(&name) || !entry.file_type().await?.is_dir() {
                continue;
            }

            let updated_at = match load_record(&path).await {
                Some(record) => record.updated_at,
                None => entry.metadata().await?.modified()?.into(),
            };
            if updated_at >= cutoff {
                continue;
            }

            if let Err(e) = fs::remove_dir_all(&path).await {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to delete expired session"
                );
            } else {
                tracing::debug!(digest = %name, %updated_at, "Cleaned up expired session");
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            tracing::info!(count = cleaned, "Cleaned up expired sessions");
        }

        Ok(cleaned)
    }

    /// Map a client-supplied session path back onto the temp root.
    fn resolve_session_dir(&self, temp_dir: &str) -> Result<PathBuf> {
        let path = Path::new(temp_dir);
        let invalid = || Error::InvalidPath(format!("not a session directory: {temp_dir}"));

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| is_digest(n))
            .ok_or_else(invalid)?;
        if path.parent() != Some(self.config.temp_root.as_path()) {
            return Err(invalid());
        }
        Ok(self.config.temp_root.join(name))
    }
}

fn absolute(path: &str) -> Result<&Path> {
    let path = Path::new(path);
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(Error::InvalidPath(format!(
            "{} must be absolute",
            path.display()
        )))
    }
}

fn plain_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidPath(format!("'{name}' is not a plain file name")));
    }
    Ok(())
}

fn sidecar_path(chunk: &Path) -> PathBuf {
    let mut name = chunk.as_os_str().to_owned();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

async fn load_record(dir: &Path) -> Option<SessionRecord> {
    let path = dir.join(SESSION_FILE);
    let contents = fs::read_to_string(&path).await.ok()?;
    match serde_json::from_str(&contents) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable session record");
            None
        }
    }
}

async fn save_record(dir: &Path, record: &SessionRecord) -> Result<()> {
    let path = dir.join(SESSION_FILE);
    let json = serde_json::to_string_pretty(record)?;

    let temp_path = dir.join(format!(".{SESSION_FILE}.{}.tmp", Uuid::new_v4()));
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, &path).await?;
    Ok(())
}

/// Chunks of `file_name` whose bytes still match their sidecar.
///
/// Anything else named like a chunk is deleted.
async fn verified_chunks(dir: &Path, file_name: &str) -> Result<BTreeMap<String, String>> {
    let mut held = BTreeMap::new();

    for (_, path) in ordered_chunks(dir, file_name).await? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sidecar = sidecar_path(&path);
        let recorded = fs::read_to_string(&sidecar)
            .await
            .ok()
            .map(|s| s.trim().to_string());
        let actual = digest_file(&path).await?;

        if recorded.as_deref() == Some(actual.as_str()) {
            held.insert(name, actual);
        } else {
            tracing::debug!(chunk = %name, "Discarding unverified chunk");
            remove_if_exists(&path).await?;
            remove_if_exists(&sidecar).await?;
        }
    }

    Ok(held)
}

/// Chunk files of `file_name` sorted by parsed index, never by listing order.
async fn ordered_chunks(dir: &Path, file_name: &str) -> Result<Vec<(u64, PathBuf)>> {
    let mut chunks = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(index) = name.to_str().and_then(|n| parse_chunk_index(file_name, n)) else {
            continue;
        };
        chunks.push((index, entry.path()));
    }

    chunks.sort_by_key(|(index, _)| *index);
    Ok(chunks)
}

/// First index missing from a sorted chunk list that should start at 0.
fn first_gap(chunks: &[(u64, PathBuf)]) -> Option<u64> {
    (0u64..)
        .zip(chunks)
        .find(|(expected, (index, _))| expected != index)
        .map(|(expected, _)| expected)
}

async fn concat(chunks: &[(u64, PathBuf)], out: &Path) -> Result<String> {
    let mut output = fs::File::create(out).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

    for (_, path) in chunks {
        let mut input = fs::File::open(path).await?;
        loop {
            let n = input.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            output.write_all(&buffer[..n]).await?;
        }
    }

    output.flush().await?;
    output.sync_all().await?;
    Ok(hex::encode(hasher.finalize()))
}

async fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    if let Err(e) = fs::rename(from, to).await {
        tracing::debug!(error = %e, "Rename failed, copying instead");
        fs::copy(from, to).await?;
        fs::remove_file(from).await?;
    }
    Ok(())
}

#[cfg(unix)]
async fn apply_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o777)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn apply_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
