//! Engine-owned encrypted temporary storage for direct uploads.
//!
//! Each staged file is `nonce || ciphertext || tag`, sealed with AES-256-GCM
//! under a key that exists only in the owning request's persisted record.

use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use tracing::debug;
use uuid::Uuid;

use crate::data::DataHandle;
use crate::error::{PersistenceParseError, TempStoreError};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Bytes added to the plaintext by the on-disk envelope.
pub const ENVELOPE_OVERHEAD: u64 = (NONCE_LEN + TAG_LEN) as u64;

/// Location and key of one encrypted temp file.
#[derive(Clone)]
pub struct TempFileRef {
    filename: String,
    path: PathBuf,
    key: [u8; KEY_LEN],
    size: u64,
}

impl std::fmt::Debug for TempFileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempFileRef")
            .field("filename", &self.filename)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl TempFileRef {
    /// File name relative to the temp directory.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Absolute path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hex encoded decryption key, as persisted.
    #[must_use]
    pub fn key_hex(&self) -> String {
        hex::encode(self.key)
    }

    /// Plaintext size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    pub(crate) async fn read_plaintext(&self) -> Result<Vec<u8>, TempStoreError> {
        let sealed = tokio::fs::read(&self.path)
            .await
            .map_err(|source| TempStoreError::Io {
                operation: "temp.read",
                path: self.path.clone(),
                source,
            })?;
        open(&self.key, &sealed)
    }

    pub(crate) fn remove(&self) -> Result<(), TempStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "temp file already gone");
                Ok(())
            }
            Err(source) => Err(TempStoreError::Io {
                operation: "temp.remove",
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Directory of encrypted temp files backing direct uploads.
#[derive(Debug, Clone)]
pub struct TempStore {
    dir: PathBuf,
}

impl TempStore {
    /// Open (creating if needed) the temp directory.
    ///
    /// # Errors
    ///
    /// Returns [`TempStoreError::Io`] when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TempStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| TempStoreError::Io {
            operation: "temp.create_dir",
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the staged files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encrypt `bytes` under a fresh key into a new temp file.
    ///
    /// # Errors
    ///
    /// Returns [`TempStoreError`] when sealing or writing fails.
    pub fn stage(&self, bytes: &[u8]) -> Result<DataHandle, TempStoreError> {
        let key: [u8; KEY_LEN] = rand::random();
        let filename = format!("{}.tmp", Uuid::new_v4());
        let path = self.dir.join(&filename);
        let sealed = seal(&key, bytes)?;
        fs::write(&path, sealed).map_err(|source| TempStoreError::Io {
            operation: "temp.write",
            path: path.clone(),
            source,
        })?;
        debug!(file = %filename, size = bytes.len(), "staged direct upload");
        Ok(DataHandle::encrypted(TempFileRef {
            filename,
            path,
            key,
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
        }))
    }

    /// Reattach to a file staged by an earlier process.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceParseError`] when the file name or key is invalid,
    /// the file is missing, or its size does not match `size`.
    pub fn reattach(
        &self,
        filename: &str,
        key_hex: &str,
        size: u64,
    ) -> Result<DataHandle, PersistenceParseError> {
        if filename.is_empty()
            || filename.contains(['/', '\\'])
            || filename == "."
            || filename == ".."
        {
            return Err(PersistenceParseError::InvalidField {
                field: "source.temp.filename",
                reason: format!("not a plain file name: {filename:?}"),
            });
        }
        let key_bytes = hex::decode(key_hex).map_err(|err| PersistenceParseError::InvalidField {
            field: "source.temp.decrypt_key",
            reason: err.to_string(),
        })?;
        let key: [u8; KEY_LEN] =
            key_bytes
                .try_into()
                .map_err(|bytes: Vec<u8>| PersistenceParseError::InvalidField {
                    field: "source.temp.decrypt_key",
                    reason: format!("expected {KEY_LEN} bytes, found {}", bytes.len()),
                })?;

        let path = self.dir.join(filename);
        let on_disk = fs::metadata(&path)
            .map_err(|source| PersistenceParseError::TempUnavailable {
                path: path.clone(),
                source,
            })?
            .len();
        let actual = on_disk.saturating_sub(ENVELOPE_OVERHEAD);
        if on_disk < ENVELOPE_OVERHEAD || actual != size {
            return Err(PersistenceParseError::SizeMismatch {
                expected: size,
                actual,
            });
        }
        Ok(DataHandle::encrypted(TempFileRef {
            filename: filename.to_string(),
            path,
            key,
            size,
        }))
    }
}

fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, TempStoreError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| TempStoreError::Crypto {
        operation: "temp.seal.key",
    })?;
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| TempStoreError::Crypto {
            operation: "temp.seal",
        })?;
    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Vec<u8>, TempStoreError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(TempStoreError::Crypto {
            operation: "temp.open.truncated",
        });
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| TempStoreError::Crypto {
        operation: "temp.open.key",
    })?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| TempStoreError::Crypto {
            operation: "temp.open",
        })
}
