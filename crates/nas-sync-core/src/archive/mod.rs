//! Packing a local source into a single transferable payload.
//!
//! A directory becomes a deflated zip named `.<basename>.zip` inside a
//! caller-owned workspace directory. A regular file is transferred as-is and
//! is never modified or removed.
//!
//! Archives are reproducible: entries are written in sorted order with a fixed
//! timestamp, so packing an unchanged tree twice yields the same digest. This
//! is what lets a later run resume against chunks uploaded by an earlier one.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::digest::digest_file;
use crate::error::{Error, Result};
use crate::{ARCHIVE_PREFIX, ARCHIVE_SUFFIX};

/// What kind of source a payload was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// A single regular file, sent unarchived
    File,
    /// A directory tree, sent as a zip archive
    Directory,
}

/// The single file that gets chunked and uploaded.
#[derive(Debug, Clone)]
pub struct Payload {
    /// Location of the payload bytes
    pub path: PathBuf,
    /// Name the payload is known by remotely
    pub file_name: String,
    /// Source kind
    pub kind: PayloadKind,
    /// Size in bytes
    pub size: u64,
    /// Whole-payload SHA-256 hex digest
    pub digest: String,
    /// Archive entry names, empty for file payloads
    pub entries: Vec<String>,
    /// Permission bits of a file source, applied remotely after merge
    pub mode: Option<u32>,
}

impl Payload {
    /// Whether this payload needs extraction after merge.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self.kind, PayloadKind::Directory)
    }
}

/// Generated archive name for a directory basename.
#[must_use]
pub fn archive_name(basename: &str) -> String {
    format!("{ARCHIVE_PREFIX}{basename}{ARCHIVE_SUFFIX}")
}

/// Whether `name` has the shape of a generated archive name.
#[must_use]
pub fn is_archive_name(name: &str) -> bool {
    name.len() > ARCHIVE_PREFIX.len() + ARCHIVE_SUFFIX.len()
        && name.starts_with(ARCHIVE_PREFIX)
        && name.ends_with(ARCHIVE_SUFFIX)
}

/// The directory basename a generated archive name was built from.
///
/// Names that were not generated by [`archive_name`] are returned unchanged
/// apart from the prefix or suffix that is present.
#[must_use]
pub fn strip_archive_name(name: &str) -> &str {
    let name = name.strip_prefix(ARCHIVE_PREFIX).unwrap_or(name);
    name.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(name)
}

/// Builds payloads from local sources and extracts archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct Archiver;

impl Archiver {
    /// Turn `source` into a payload, writing any archive into `workspace`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the source does not exist, or an I/O or archive
    /// error if it cannot be read or packed.
    pub async fn pack(source: &Path, workspace: &Path) -> Result<Payload> {
        let source = match tokio::fs::canonicalize(source).await {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(source.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let basename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidPath(format!("{} has no name", source.display())))?;

        let metadata = tokio::fs::metadata(&source).await?;

        if metadata.is_file() {
            let digest = digest_file(&source).await?;
            tracing::debug!(path = %source.display(), %digest, "Using file payload as-is");
            return Ok(Payload {
                path: source,
                file_name: basename,
                kind: PayloadKind::File,
                size: metadata.len(),
                digest,
                entries: Vec::new(),
                mode: Some(permissions(&metadata)),
            });
        }

        let file_name = archive_name(&basename);
        let archive_path = workspace.join(&file_name);

        let entries = {
            let source = source.clone();
            let archive_path = archive_path.clone();
            tokio::task::spawn_blocking(move || write_archive(&source, &archive_path)).await??
        };

        let size = tokio::fs::metadata(&archive_path).await?.len();
        let digest = digest_file(&archive_path).await?;

        tracing::debug!(
            source = %source.display(),
            archive = %archive_path.display(),
            entries = entries.len(),
            size,
            %digest,
            "Packed directory"
        );

        Ok(Payload {
            path: archive_path,
            file_name,
            kind: PayloadKind::Directory,
            size,
            digest,
            entries,
            mode: None,
        })
    }

    /// List the entry names stored in an archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be opened.
    pub async fn entries(archive: &Path) -> Result<Vec<String>> {
        let archive = archive.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let zip = zip::ZipArchive::new(File::open(&archive)?)?;
            Ok(zip.file_names().map(String::from).collect())
        })
        .await?
    }

    /// Extract entries of `archive` into `dest`.
    ///
    /// With `entries` set, every name must exist in the archive or nothing is
    /// written and `Extraction` names the first missing entry. Existing files
    /// are replaced only when `overwrite` is set. Returns the extracted names.
    ///
    /// # Errors
    ///
    /// Returns `Extraction` for unknown entries, `InvalidPath` for entries
    /// that would escape `dest`, or an I/O error.
    pub async fn extract(
        archive: &Path,
        dest: &Path,
        entries: Option<Vec<String>>,
        overwrite: bool,
    ) -> Result<Vec<String>> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extract_entries(&archive, &dest, entries, overwrite))
            .await?
    }
}

fn write_archive(source: &Path, archive_path: &Path) -> Result<Vec<String>> {
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(archive_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let base_options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut entries = Vec::new();

    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            tracing::warn!(path = %entry.path().display(), "Skipping symlink");
            continue;
        }

        let name = entry_name(source, entry.path())?;
        let options = base_options.unix_permissions(permissions(&entry.metadata()?));

        if file_type.is_dir() {
            let name = format!("{name}/");
            zip.add_directory(name.as_str(), options)?;
            entries.push(name);
        } else {
            zip.start_file(name.as_str(), options)?;
            let mut f = File::open(entry.path())?;
            io::copy(&mut f, &mut zip)?;
            entries.push(name);
        }
    }

    zip.finish()?;
    Ok(entries)
}

/// Entry name of `path` relative to `root`, always `/`-separated.
fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Error::InvalidPath(format!("{} is outside the source", path.display())))?;

    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    Ok(parts.join("/"))
}

#[cfg(unix)]
fn permissions(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permissions(metadata: &std::fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else {
        0o644
    }
}

fn extract_entries(
    archive: &Path,
    dest: &Path,
    entries: Option<Vec<String>>,
    overwrite: bool,
) -> Result<Vec<String>> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;

    let indices: Vec<usize> = match &entries {
        Some(names) => names
            .iter()
            .map(|name| {
                zip.index_for_name(name).ok_or_else(|| Error::Extraction {
                    entry: name.clone(),
                    reason: "filename not matched".to_string(),
                })
            })
            .collect::<Result<_>>()?,
        None => (0..zip.len()).collect(),
    };

    std::fs::create_dir_all(dest)?;
    let mut extracted = Vec::with_capacity(indices.len());

    for index in indices {
        let mut file = zip.by_index(index)?;
        let name = file.name().to_string();
        let relative = file
            .enclosed_name()
            .ok_or_else(|| Error::InvalidPath(format!("archive entry escapes destination: {name}")))?;
        let target = dest.join(relative);

        if file.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if !overwrite && target.exists() {
                tracing::debug!(entry = %name, "Keeping existing file");
                extracted.push(name);
                continue;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut file, &mut out)?;
        }

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode & 0o777))?;
        }

        extracted.push(name);
    }

    Ok(extracted)
}
