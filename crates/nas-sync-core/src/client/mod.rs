//! Typed calls for each protocol operation.
//!
//! [`ProxyClient`] wraps a [`Transport`], encodes parameters, and turns any
//! non-2xx response into [`Error::Transport`]. Refusals that the server
//! reports inside a successful response (`ok: false`) are returned as values
//! so the caller can decide whether to resend.

use semver::Version;
use serde::de::DeserializeOwned;

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::protocol::{
    ChunkAck, ChunkQuery, CleanAck, CleanQuery, CommandOutput, MergeAck, MergeQuery,
    NegotiateQuery, Operation, RemotePathStat, StatQuery, TransferManifest, UnzipRequest,
    VersionInfo,
};
use crate::transport::{Transport, TransportRequest};

/// Result of comparing local and remote protocol versions.
#[derive(Debug, Clone)]
pub struct VersionStatus {
    /// Protocol version this client speaks
    pub local: Version,
    /// Protocol version reported by the server
    pub remote: Version,
    /// Server crate version
    pub server_version: String,
    /// Whether the two protocol versions can interoperate
    pub compatible: bool,
}

/// Whether two protocol versions can interoperate.
///
/// Majors must match; while the major is 0 the minors must match as well.
#[must_use]
pub fn protocol_compatible(local: &Version, remote: &Version) -> bool {
    if local.major != remote.major {
        return false;
    }
    local.major != 0 || local.minor == remote.minor
}

/// Typed client for the remote assembler.
#[derive(Debug, Clone)]
pub struct ProxyClient<T> {
    transport: T,
}

impl<T: Transport> ProxyClient<T> {
    /// Wrap a transport.
    #[must_use]
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Inspect a remote path.
    pub async fn stat(&self, dst_path: &str) -> Result<RemotePathStat> {
        let request = TransportRequest::new(Operation::Stat).with_query(&StatQuery {
            dst_path: dst_path.to_string(),
        })?;
        self.call(Operation::Stat, request).await
    }

    /// Create or resume the session for a payload digest.
    pub async fn negotiate(&self, query: &NegotiateQuery) -> Result<TransferManifest> {
        let request = TransportRequest::new(Operation::Negotiate).with_query(query)?;
        self.call(Operation::Negotiate, request).await
    }

    /// Send one chunk's bytes.
    pub async fn upload_chunk(&self, temp_dir: &str, chunk: &Chunk, data: Vec<u8>) -> Result<ChunkAck> {
        let request = TransportRequest::new(Operation::UploadChunk)
            .with_query(&ChunkQuery {
                temp_dir: temp_dir.to_string(),
                chunk_name: chunk.name.clone(),
                digest: chunk.digest.clone(),
            })?
            .with_bytes(data);
        self.call(Operation::UploadChunk, request).await
    }

    /// Concatenate and verify the uploaded chunks.
    pub async fn merge(&self, query: &MergeQuery) -> Result<MergeAck> {
        let request = TransportRequest::new(Operation::Merge).with_query(query)?;
        self.call(Operation::Merge, request).await
    }

    /// Extract one batch of archive entries.
    pub async fn unzip_batch(&self, request: &UnzipRequest) -> Result<CommandOutput> {
        let request = TransportRequest::new(Operation::UnzipBatch).with_json(request)?;
        self.call(Operation::UnzipBatch, request).await
    }

    /// Remove the session directory and merged archive.
    pub async fn clean(&self, query: &CleanQuery) -> Result<CleanAck> {
        let request = TransportRequest::new(Operation::Clean).with_query(query)?;
        self.call(Operation::Clean, request).await
    }

    /// Fetch the server's version report.
    pub async fn version(&self) -> Result<VersionInfo> {
        self.call(Operation::Version, TransportRequest::new(Operation::Version))
            .await
    }

    /// Compare the server's protocol version with ours.
    ///
    /// # Errors
    ///
    /// Returns an error if the version route fails or reports an unparsable
    /// version.
    pub async fn check_version(&self) -> Result<VersionStatus> {
        let local = Version::parse(crate::PROTOCOL_VERSION)
            .map_err(|e| Error::Internal(format!("failed to parse protocol version: {e}")))?;

        let info = self.version().await?;
        let remote = Version::parse(&info.protocol).map_err(|e| {
            Error::ProtocolError(format!(
                "server reported invalid protocol version '{}': {e}",
                info.protocol
            ))
        })?;

        let compatible = protocol_compatible(&local, &remote);
        Ok(VersionStatus {
            local,
            remote,
            server_version: info.version,
            compatible,
        })
    }

    async fn call<R: DeserializeOwned>(
        &self,
        operation: Operation,
        request: TransportRequest,
    ) -> Result<R> {
        let response = self.transport.request(request).await?;

        if !response.is_success() {
            return Err(Error::Transport(format!(
                "{operation} returned status {}: {}",
                response.status,
                response.error_message()
            )));
        }

        response.json()
    }
}
