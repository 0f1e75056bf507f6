//! File-backed repository for persisted insert requests.

use std::io;
use std::path::{Path, PathBuf};

use cairn_insert_core::RequestIdentity;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::PersistedPut;

const RECORD_EXTENSION: &str = "json";

/// Errors raised by [`RequestStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("request store io failure")]
    Io {
        /// Operation being attempted.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: io::Error,
    },
    /// A record could not be serialised.
    #[error("request store serialisation failure")]
    Serialize {
        /// Operation being attempted.
        operation: &'static str,
        /// Underlying serde failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Raw stored document, not yet validated.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    /// File the document was read from.
    pub path: PathBuf,
    /// Parsed JSON body.
    pub document: Value,
}

/// One JSON file per request under a state directory.
#[derive(Debug, Clone)]
pub struct RequestStore {
    dir: PathBuf,
}

impl RequestStore {
    /// Open (creating if needed) the store directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            operation: "store.create_dir",
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `identity`.
    #[must_use]
    pub fn record_path(&self, identity: &RequestIdentity) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.{RECORD_EXTENSION}",
            hex::encode(identity.client.as_bytes()),
            hex::encode(identity.identifier.as_bytes())
        ))
    }

    /// Write `record`, replacing any earlier version atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when serialisation or any file operation fails.
    pub async fn save(&self, record: &PersistedPut) -> Result<PathBuf, StoreError> {
        let path = self.record_path(&record.identity());
        let body = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Serialize {
            operation: "store.save",
            source,
        })?;
        let staging = path.with_extension("json.partial");
        tokio::fs::write(&staging, body)
            .await
            .map_err(|source| StoreError::Io {
                operation: "store.write",
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|source| StoreError::Io {
                operation: "store.rename",
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "persisted request record");
        Ok(path)
    }

    /// Remove the record for `identity`. Returns whether a file existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] for failures other than a missing file.
    pub async fn delete(&self, identity: &RequestIdentity) -> Result<bool, StoreError> {
        let path = self.record_path(identity);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io {
                operation: "store.delete",
                path,
                source,
            }),
        }
    }

    /// Read every stored document. Files that are not valid JSON are logged
    /// and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be listed.
    pub async fn load_all(&self) -> Result<Vec<StoredDocument>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|source| StoreError::Io {
                operation: "store.read_dir",
                path: self.dir.clone(),
                source,
            })?;
        let mut documents = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|source| StoreError::Io {
                operation: "store.read_dir",
                path: self.dir.clone(),
                source,
            })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable request record");
                    continue;
                }
            };
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(document) => documents.push(StoredDocument { path, document }),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping corrupt request record");
                }
            }
        }
        documents.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PersistedSource, SCHEMA_VERSION};
    use cairn_events::PersistenceMode;
    use cairn_insert_core::{InsertUri, PriorityClass};

    fn record(identifier: &str) -> PersistedPut {
        PersistedPut {
            version: SCHEMA_VERSION,
            identifier: identifier.into(),
            client_name: "fproxy".into(),
            uri: InsertUri::parse("CHK@").expect("uri"),
            priority_class: PriorityClass::default(),
            persistence: PersistenceMode::DurableRebootPersistent,
            verbosity: 0,
            client_token: Some("token".into()),
            max_retries: 3,
            global: false,
            get_chk_only: false,
            dont_compress: true,
            early_encode: false,
            started: false,
            finished: false,
            succeeded: false,
            final_uri: None,
            failure: None,
            target_filename: None,
            content_type: None,
            source: PersistedSource::Redirect {
                target_uri: InsertUri::parse("CHK@target").expect("uri"),
            },
            progress: None,
        }
    }

    #[tokio::test]
    async fn save_load_and_delete() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = RequestStore::open(dir.path().join("requests"))?;

        let first = record("a/b");
        store.save(&first).await?;
        store.save(&record("second")).await?;

        let loaded = store.load_all().await?;
        assert_eq!(loaded.len(), 2);
        let decoded: Vec<PersistedPut> = loaded
            .into_iter()
            .map(|doc| PersistedPut::decode(doc.document))
            .collect::<Result<_, _>>()?;
        assert!(decoded.contains(&first));

        assert!(store.delete(&first.identity()).await?);
        assert!(!store.delete(&first.identity()).await?);
        assert_eq!(store.load_all().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_files_are_skipped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = RequestStore::open(dir.path())?;
        store.save(&record("good")).await?;
        std::fs::write(dir.path().join("broken.json"), b"{not json")?;
        std::fs::write(dir.path().join("notes.txt"), b"ignored")?;

        let loaded = store.load_all().await?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].document["identifier"], "good");
        Ok(())
    }
}
