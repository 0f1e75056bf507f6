//! Byte sources owned by insert requests.
//!
//! A [`DataHandle`] is held by exactly one request and released once, which
//! consumes it. Inserters read through [`DataReader`] views that share the
//! handle's state, so a read after release fails instead of touching a
//! deleted temp file.

mod temp;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cairn_events::DataSourceKind;
use tracing::debug;

use crate::error::{InsertError, TempStoreError};

pub use temp::{ENVELOPE_OVERHEAD, TempFileRef, TempStore};

#[derive(Debug)]
enum Backing {
    Memory(Vec<u8>),
    File { path: PathBuf },
    EncryptedTemp(TempFileRef),
}

#[derive(Debug)]
struct HandleState {
    backing: Backing,
    released: AtomicBool,
}

impl HandleState {
    fn size(&self) -> u64 {
        match &self.backing {
            Backing::Memory(bytes) => u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            Backing::File { path } => match std::fs::metadata(path) {
                Ok(meta) => meta.len(),
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "disk source not readable");
                    0
                }
            },
            Backing::EncryptedTemp(temp) => temp.size(),
        }
    }
}

/// Exclusively owned byte source of a request.
#[derive(Debug)]
pub struct DataHandle {
    state: Arc<HandleState>,
}

impl DataHandle {
    /// In-memory bytes, used for redirect descriptors and connection-bound inserts.
    #[must_use]
    pub fn memory(bytes: Vec<u8>) -> Self {
        Self::from_backing(Backing::Memory(bytes))
    }

    /// Caller-owned file read in place. Releasing it never deletes the file.
    #[must_use]
    pub fn disk(path: impl Into<PathBuf>) -> Self {
        Self::from_backing(Backing::File { path: path.into() })
    }

    pub(crate) fn encrypted(temp: TempFileRef) -> Self {
        Self::from_backing(Backing::EncryptedTemp(temp))
    }

    fn from_backing(backing: Backing) -> Self {
        Self {
            state: Arc::new(HandleState {
                backing,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Current size of the data in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.state.size()
    }

    /// Source kind this handle naturally belongs to.
    #[must_use]
    pub fn kind(&self) -> DataSourceKind {
        match self.state.backing {
            Backing::File { .. } => DataSourceKind::Disk,
            Backing::Memory(_) | Backing::EncryptedTemp(_) => DataSourceKind::Direct,
        }
    }

    /// Caller-owned path, for disk handles.
    #[must_use]
    pub fn disk_path(&self) -> Option<&Path> {
        match &self.state.backing {
            Backing::File { path } => Some(path),
            _ => None,
        }
    }

    /// Encrypted temp file backing this handle, if any.
    #[must_use]
    pub fn temp_file(&self) -> Option<&TempFileRef> {
        match &self.state.backing {
            Backing::EncryptedTemp(temp) => Some(temp),
            _ => None,
        }
    }

    /// Shared read-only view handed to inserters.
    #[must_use]
    pub fn reader(&self) -> DataReader {
        DataReader {
            state: Arc::clone(&self.state),
        }
    }

    /// Release the handle. Engine-owned temp files are deleted; caller-owned
    /// files are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`TempStoreError::Io`] when a temp file cannot be removed. The
    /// handle counts as released regardless.
    pub fn release(self) -> Result<(), TempStoreError> {
        if self.state.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match &self.state.backing {
            Backing::Memory(_) | Backing::File { .. } => Ok(()),
            Backing::EncryptedTemp(temp) => temp.remove(),
        }
    }
}

/// Read-only view of a [`DataHandle`] that stops working once it is released.
#[derive(Debug, Clone)]
pub struct DataReader {
    state: Arc<HandleState>,
}

impl DataReader {
    /// Whether the owning handle has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.state.released.load(Ordering::Acquire)
    }

    /// Current size of the data in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.state.size()
    }

    /// Read the complete payload.
    ///
    /// # Errors
    ///
    /// Returns [`InsertError::SourceUnreadable`] after release, or when the
    /// backing file cannot be read or decrypted.
    pub async fn read_all(&self) -> Result<Vec<u8>, InsertError> {
        if self.is_released() {
            return Err(InsertError::source_unreadable("data handle already released"));
        }
        match &self.state.backing {
            Backing::Memory(bytes) => Ok(bytes.clone()),
            Backing::File { path } => tokio::fs::read(path)
                .await
                .map_err(|err| InsertError::source_unreadable(format!("{}: {err}", path.display()))),
            Backing::EncryptedTemp(temp) => temp
                .read_plaintext()
                .await
                .map_err(InsertError::source_unreadable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_fail_after_release() {
        let handle = DataHandle::memory(b"payload".to_vec());
        let reader = handle.reader();
        assert_eq!(reader.read_all().await.expect("read"), b"payload");
        assert_eq!(handle.size(), 7);

        handle.release().expect("release");
        assert!(reader.is_released());
        let err = reader.read_all().await.expect_err("released");
        assert_eq!(err.kind(), "source_unreadable");
    }

    #[tokio::test]
    async fn disk_release_keeps_caller_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("site.html");
        std::fs::write(&path, b"<html></html>")?;

        let handle = DataHandle::disk(&path);
        assert_eq!(handle.kind(), DataSourceKind::Disk);
        assert_eq!(handle.disk_path(), Some(path.as_path()));
        assert_eq!(handle.size(), 13);
        handle.release()?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn missing_disk_file_reports_zero_size() {
        let handle = DataHandle::disk("/nonexistent/cairn/file.bin");
        assert_eq!(handle.size(), 0);
    }
}
