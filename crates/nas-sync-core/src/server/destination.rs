//! Where a payload lands given what already exists at the destination.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::strip_archive_name;
use crate::error::{Error, Result};
use crate::protocol::RemotePathStat;

/// What exists at a destination path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existing {
    /// An existing directory
    Directory,
    /// An existing file (or anything that is not a directory)
    File,
    /// Nothing
    Absent,
}

/// Resolved destination of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Directory the payload is placed in
    pub dst_dir: PathBuf,
    /// Name of the file or extraction directory inside `dst_dir`
    pub dst_name: String,
}

impl Destination {
    fn new(dst_dir: impl Into<PathBuf>, dst_name: impl Into<String>) -> Self {
        Self {
            dst_dir: dst_dir.into(),
            dst_name: dst_name.into(),
        }
    }

    /// Full path of the file or extraction directory.
    #[must_use]
    pub fn target(&self) -> PathBuf {
        self.dst_dir.join(&self.dst_name)
    }
}

/// Resolve a destination from the payload kind and what exists at `dst`.
///
/// | `dst` is | payload | trailing `/` | result |
/// |----------|---------|--------------|--------|
/// | directory | directory | yes | `dst` itself |
/// | directory | directory | no | `dst/<archive basename>` |
/// | directory | file | any | `dst/<file name>` |
/// | file | directory | any | conflict |
/// | file | file | yes | conflict |
/// | file | file | no | overwrite `dst` |
/// | absent | any | any | `dst` |
///
/// # Errors
///
/// Returns `DestinationConflict` for the conflict rows and `InvalidPath` if
/// `dst` has no parent or name where one is needed.
pub fn resolve(
    dst: &Path,
    file_name: &str,
    is_dir: bool,
    trailing_slash: bool,
    existing: Existing,
) -> Result<Destination> {
    match existing {
        Existing::Directory if is_dir && trailing_slash => Ok(split(dst)
            .unwrap_or_else(|_| Destination::new(dst, strip_archive_name(file_name)))),
        Existing::Directory if is_dir => Ok(Destination::new(dst, strip_archive_name(file_name))),
        Existing::Directory => Ok(Destination::new(dst, file_name)),
        Existing::File if is_dir => Err(conflict(dst, "cannot copy a directory onto an existing file")),
        Existing::File if trailing_slash => Err(conflict(dst, "not a directory")),
        Existing::File | Existing::Absent => split(dst),
    }
}

/// Stat `dst` and resolve it.
///
/// # Errors
///
/// See [`resolve`]; I/O errors other than not-found are returned as-is.
pub async fn resolve_destination(
    dst: &Path,
    file_name: &str,
    is_dir: bool,
    trailing_slash: bool,
) -> Result<Destination> {
    let existing = match tokio::fs::metadata(probe_path(dst)).await {
        Ok(meta) if meta.is_dir() => Existing::Directory,
        Ok(_) => Existing::File,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Existing::Absent,
        Err(e) => return Err(e.into()),
    };
    resolve(dst, file_name, is_dir, trailing_slash, existing)
}

/// Stat a remote path for the client.
pub async fn stat_path(dst: &Path) -> RemotePathStat {
    let probe = probe_path(dst);
    let meta = tokio::fs::metadata(&probe).await.ok();
    let parent_dir_exists = match probe.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::metadata(parent)
            .await
            .is_ok_and(|m| m.is_dir()),
        _ => true,
    };

    RemotePathStat {
        path: dst.display().to_string(),
        exists: meta.is_some(),
        parent_dir_exists,
        is_dir: meta.as_ref().is_some_and(std::fs::Metadata::is_dir),
        is_file: meta.as_ref().is_some_and(std::fs::Metadata::is_file),
    }
}

/// `dst` without a trailing separator, so `a.txt/` stats as `a.txt`.
fn probe_path(dst: &Path) -> PathBuf {
    dst.components().collect()
}

fn split(dst: &Path) -> Result<Destination> {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidPath(format!("{} has no file name", dst.display())))?;
    let parent = dst
        .parent()
        .ok_or_else(|| Error::InvalidPath(format!("{} has no parent", dst.display())))?;
    Ok(Destination::new(parent, name))
}

fn conflict(dst: &Path, reason: &str) -> Error {
    Error::DestinationConflict {
        path: dst.display().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dest(dir: &str, name: &str) -> Destination {
        Destination::new(dir, name)
    }

    #[test]
    fn test_directory_into_existing_directory() {
        let resolved = resolve(
            Path::new("/mnt/nas/www"),
            ".site.zip",
            true,
            false,
            Existing::Directory,
        )
        .expect("resolve");
        assert_eq!(resolved, dest("/mnt/nas/www", "site"));
        assert_eq!(resolved.target(), PathBuf::from("/mnt/nas/www/site"));
    }

    #[test]
    fn test_directory_onto_existing_directory_with_slash() {
        let resolved = resolve(
            Path::new("/mnt/nas/www/"),
            ".site.zip",
            true,
            true,
            Existing::Directory,
        )
        .expect("resolve");
        assert_eq!(resolved, dest("/mnt/nas", "www"));
    }

    #[test]
    fn test_file_into_existing_directory() {
        let resolved = resolve(
            Path::new("/mnt/nas/docs"),
            "report.pdf",
            false,
            false,
            Existing::Directory,
        )
        .expect("resolve");
        assert_eq!(resolved, dest("/mnt/nas/docs", "report.pdf"));
    }

    #[test]
    fn test_file_onto_existing_file() {
        let resolved = resolve(
            Path::new("/mnt/nas/docs/old.pdf"),
            "report.pdf",
            false,
            false,
            Existing::File,
        )
        .expect("resolve");
        assert_eq!(resolved, dest("/mnt/nas/docs", "old.pdf"));
    }

    #[test]
    fn test_conflicts() {
        let err = resolve(
            Path::new("/mnt/nas/a.txt"),
            ".site.zip",
            true,
            false,
            Existing::File,
        )
        .expect_err("dir onto file");
        assert!(matches!(err, Error::DestinationConflict { .. }));

        let err = resolve(
            Path::new("/mnt/nas/a.txt/"),
            "b.txt",
            false,
            true,
            Existing::File,
        )
        .expect_err("slash onto file");
        assert!(matches!(err, Error::DestinationConflict { ref reason, .. } if reason == "not a directory"));
    }

    #[test]
    fn test_absent_destination_is_taken_literally() {
        assert_eq!(
            resolve(Path::new("/mnt/nas/new"), ".site.zip", true, false, Existing::Absent)
                .expect("resolve"),
            dest("/mnt/nas", "new")
        );
        assert_eq!(
            resolve(Path::new("/mnt/nas/new.pdf"), "a.pdf", false, false, Existing::Absent)
                .expect("resolve"),
            dest("/mnt/nas", "new.pdf")
        );
    }

    #[test]
    fn test_root_with_slash_falls_back_to_archive_name() {
        assert_eq!(
            resolve(Path::new("/"), ".site.zip", true, true, Existing::Directory).expect("resolve"),
            dest("/", "site")
        );
    }

    #[tokio::test]
    async fn test_stat_and_resolve_on_disk() {
        let temp = TempDir::new().expect("create temp dir");
        let dir = temp.path().join("www");
        std::fs::create_dir_all(&dir).expect("mkdir");
        let file = temp.path().join("a.txt");
        std::fs::write(&file, b"x").expect("write");

        let stat = stat_path(&dir).await;
        assert!(stat.exists && stat.is_dir && !stat.is_file && stat.parent_dir_exists);

        let stat = stat_path(&temp.path().join("missing/child")).await;
        assert!(!stat.exists);
        assert!(!stat.parent_dir_exists);

        let resolved = resolve_destination(&dir, ".site.zip", true, false)
            .await
            .expect("resolve");
        assert_eq!(resolved.target(), dir.join("site"));

        assert!(resolve_destination(&file, ".site.zip", true, false)
            .await
            .is_err());

        let with_slash = PathBuf::from(format!("{}/", file.display()));
        assert!(stat_path(&with_slash).await.is_file);
        let err = resolve_destination(&with_slash, "b.txt", false, true)
            .await
            .expect_err("slash onto file");
        assert!(matches!(err, Error::DestinationConflict { .. }));
    }
}
