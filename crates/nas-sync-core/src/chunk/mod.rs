//! Splitting a payload into fixed-size, individually digested parts.

use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;

use crate::digest::digest_bytes;
use crate::error::{Error, Result};

/// Separator between the payload name and the chunk index.
pub const CHUNK_SEPARATOR: &str = ".part-";

/// One contiguous slice of a payload, stored as its own file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the payload, starting at 0
    pub index: u64,
    /// Byte offset in the payload
    pub offset: u64,
    /// Length in bytes
    pub len: u64,
    /// SHA-256 hex digest of the chunk bytes
    pub digest: String,
    /// Chunk name, `<payload name>.part-<index>`
    pub name: String,
    /// Local chunk file
    pub path: PathBuf,
}

/// Name of chunk `index` of the payload called `file_name`.
#[must_use]
pub fn chunk_name(file_name: &str, index: u64) -> String {
    format!("{file_name}{CHUNK_SEPARATOR}{index}")
}

/// Parse the index out of a chunk name belonging to `file_name`.
///
/// Returns `None` for names of other payloads or malformed indices.
#[must_use]
pub fn parse_chunk_index(file_name: &str, candidate: &str) -> Option<u64> {
    let index = candidate
        .strip_prefix(file_name)?
        .strip_prefix(CHUNK_SEPARATOR)?;

    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if index.len() > 1 && index.starts_with('0') {
        return None;
    }
    index.parse().ok()
}

/// Partition `total_len` bytes into `(offset, len)` pieces of `chunk_size`.
///
/// The last piece carries the remainder; an exact multiple ends with a full
/// piece and an empty payload has no pieces.
#[must_use]
pub fn plan(total_len: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    if chunk_size == 0 {
        return Vec::new();
    }

    let mut pieces = Vec::with_capacity(usize::try_from(total_len.div_ceil(chunk_size)).unwrap_or(0));
    let mut offset = 0;
    while offset < total_len {
        let len = chunk_size.min(total_len - offset);
        pieces.push((offset, len));
        offset += len;
    }
    pieces
}

/// Splits payload files into chunk files.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    /// Create a chunker with the given chunk size in bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `chunk_size` is zero.
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig {
                key: "chunk_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(Self { chunk_size })
    }

    /// Chunk size in bytes.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `payload` into chunk files inside `out_dir`.
    ///
    /// Chunks are named after `file_name` and returned in index order.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be read or a chunk file cannot
    /// be written.
    pub async fn split(&self, payload: &Path, file_name: &str, out_dir: &Path) -> Result<Vec<Chunk>> {
        let mut file = tokio::fs::File::open(payload).await?;
        let total_len = file.metadata().await?.len();

        tokio::fs::create_dir_all(out_dir).await?;

        let pieces = plan(total_len, self.chunk_size as u64);
        let mut chunks = Vec::with_capacity(pieces.len());
        let mut buffer = vec![0u8; self.chunk_size];

        for (index, (offset, len)) in (0u64..).zip(pieces) {
            let len_usize = usize::try_from(len)
                .map_err(|_| Error::Internal(format!("chunk length {len} overflows usize")))?;
            let data = &mut buffer[..len_usize];
            file.read_exact(data).await?;

            let name = chunk_name(file_name, index);
            let path = out_dir.join(&name);
            tokio::fs::write(&path, &*data).await?;

            chunks.push(Chunk {
                index,
                offset,
                len,
                digest: digest_bytes(data),
                name,
                path,
            });
        }

        tracing::debug!(
            payload = %payload.display(),
            chunks = chunks.len(),
            chunk_size = self.chunk_size,
            "Split payload"
        );

        Ok(chunks)
    }
}

/// Format a byte count for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plan_edges() {
        assert!(plan(0, 5).is_empty());
        assert_eq!(plan(3, 5), vec![(0, 3)]);
        assert_eq!(plan(10, 5), vec![(0, 5), (5, 5)]);
        assert_eq!(plan(11, 5), vec![(0, 5), (5, 5), (10, 1)]);
    }

    #[test]
    fn test_chunk_names() {
        assert_eq!(chunk_name(".site.zip", 0), ".site.zip.part-0");
        assert_eq!(parse_chunk_index(".site.zip", ".site.zip.part-12"), Some(12));
        assert_eq!(parse_chunk_index(".site.zip", ".other.zip.part-1"), None);
        assert_eq!(parse_chunk_index(".site.zip", ".site.zip.part-"), None);
        assert_eq!(parse_chunk_index(".site.zip", ".site.zip.part-01"), None);
        assert_eq!(parse_chunk_index(".site.zip", ".site.zip.part-1.sha256"), None);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(Chunker::new(0), Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_split_exact_multiple_has_no_empty_tail() {
        let temp = TempDir::new().expect("create temp dir");
        let payload = temp.path().join("data.bin");
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(&payload, &data).expect("write");

        let chunks = Chunker::new(1024)
            .expect("chunker")
            .split(&payload, "data.bin", &temp.path().join("chunks"))
            .await
            .expect("split");

        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len == 1024));
        assert_eq!(chunks[3].name, "data.bin.part-3");
        assert_eq!(chunks[2].offset, 2048);

        let mut rebuilt = Vec::new();
        for chunk in &chunks {
            let bytes = std::fs::read(&chunk.path).expect("read chunk");
            assert_eq!(digest_bytes(&bytes), chunk.digest);
            rebuilt.extend_from_slice(&bytes);
        }
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn test_split_remainder_and_empty() {
        let temp = TempDir::new().expect("create temp dir");
        let payload = temp.path().join("data.bin");
        std::fs::write(&payload, vec![7u8; 2500]).expect("write");
        let chunker = Chunker::new(1000).expect("chunker");

        let chunks = chunker
            .split(&payload, "data.bin", temp.path())
            .await
            .expect("split");
        assert_eq!(
            chunks.iter().map(|c| c.len).collect::<Vec<_>>(),
            vec![1000, 1000, 500]
        );

        let empty = temp.path().join("empty.bin");
        std::fs::write(&empty, b"").expect("write");
        let chunks = chunker
            .split(&empty, "empty.bin", temp.path())
            .await
            .expect("split");
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_split_unreadable_payload() {
        let temp = TempDir::new().expect("create temp dir");
        let err = Chunker::new(16)
            .expect("chunker")
            .split(&temp.path().join("gone"), "gone", temp.path())
            .await
            .expect_err("missing payload");
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
