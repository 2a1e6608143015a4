//! Storage backend for table-store roots.
//!
//! All file access for catalog state and segment files funnels through this
//! module so path handling and atomicity live in one place. Only the local
//! filesystem is supported; the API takes a [`TableLocation`] so an object
//! storage backend can be added without rewriting the callers.

use std::io;
use std::path::{Path, PathBuf};

use snafu::{Backtrace, prelude::*};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Root location of a table store.
#[derive(Clone, Debug)]
pub enum TableLocation {
    /// A store rooted at a local filesystem directory.
    Local(PathBuf),
}

impl TableLocation {
    /// A local filesystem location.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        TableLocation::Local(root.into())
    }
}

/// Errors raised by storage operations.
#[derive(Debug, Snafu)]
pub enum StorageError {
    /// The requested path does not exist.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The missing path.
        path: String,
        /// Backtrace at the point of failure.
        backtrace: Backtrace,
    },

    /// Any other filesystem failure.
    #[snafu(display("Local I/O error at {path}: {source}"))]
    LocalIo {
        /// The path being accessed.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// Backtrace at the point of failure.
        backtrace: Backtrace,
    },
}

fn join_local(location: &TableLocation, rel: &Path) -> PathBuf {
    match location {
        TableLocation::Local(root) => root.join(rel),
    }
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent).await.context(LocalIoSnafu {
            path: parent.display().to_string(),
        })?;
    }
    Ok(())
}

/// Read the full contents of `rel_path` under `location`.
pub async fn read_all_bytes(location: &TableLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    let abs = join_local(location, rel_path);
    match fs::read(&abs).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => NotFoundSnafu {
            path: abs.display().to_string(),
        }
        .fail(),
        Err(e) => Err(e).context(LocalIoSnafu {
            path: abs.display().to_string(),
        }),
    }
}

/// Write `contents` to `rel_path` under `location` atomically.
///
/// Writes to a sibling temporary file, syncs it, then renames it into place
/// so readers never observe a partial file.
pub async fn write_atomic(
    location: &TableLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;

    let tmp = abs.with_extension("tmp");
    let tmp_display = tmp.display().to_string();

    let mut file = fs::File::create(&tmp)
        .await
        .context(LocalIoSnafu {
            path: tmp_display.clone(),
        })?;
    file.write_all(contents).await.context(LocalIoSnafu {
        path: tmp_display.clone(),
    })?;
    file.sync_all().await.context(LocalIoSnafu {
        path: tmp_display.clone(),
    })?;
    drop(file);

    fs::rename(&tmp, &abs).await.context(LocalIoSnafu {
        path: abs.display().to_string(),
    })
}

/// Whether `rel_path` exists under `location`.
pub async fn exists(location: &TableLocation, rel_path: &Path) -> bool {
    fs::try_exists(join_local(location, rel_path))
        .await
        .unwrap_or(false)
}

/// Remove `rel_path` under `location`. Removing a path that does not exist
/// is not an error.
pub async fn remove_file(location: &TableLocation, rel_path: &Path) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    match fs::remove_file(&abs).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(LocalIoSnafu {
            path: abs.display().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());
        let rel = Path::new("nested/dir/file.bin");

        write_atomic(&location, rel, b"payload").await.expect("write");
        assert!(exists(&location, rel).await);

        let bytes = read_all_bytes(&location, rel).await.expect("read");
        assert_eq!(bytes, b"payload");
    }

    #[tokio::test]
    async fn overwrite_is_atomic_replacement() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());
        let rel = Path::new("file.bin");

        write_atomic(&location, rel, b"one").await.expect("write");
        write_atomic(&location, rel, b"two").await.expect("rewrite");
        assert_eq!(read_all_bytes(&location, rel).await.expect("read"), b"two");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());
        let rel = Path::new("file.bin");

        write_atomic(&location, rel, b"data").await.expect("write");
        remove_file(&location, rel).await.expect("remove");
        assert!(!exists(&location, rel).await);
        remove_file(&location, rel).await.expect("remove again");
    }

    #[tokio::test]
    async fn missing_file_reports_not_found() {
        let tmp = TempDir::new().expect("tempdir");
        let location = TableLocation::local(tmp.path());
        let err = read_all_bytes(&location, Path::new("absent"))
            .await
            .expect_err("missing");
        assert!(matches!(err, StorageError::NotFound { .. }));
    }
}
