//! Client-facing put service: accepts submissions, restores durable requests
//! at startup and exposes restart and removal.

use std::path::PathBuf;
use std::sync::Arc;

use cairn_insert_core::{
    DataHandle, InsertUri, InserterFactory, PutParams, RequestIdentity, TempStore, UploadSource,
};
use cairn_runtime::PersistedPut;
use cairn_telemetry::{Metrics, RequestOutcome};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{LoadError, RestoreError, SubmitError};
use crate::put::PutRequest;
use crate::registry::{ClientRegistry, RequestRegistry};

/// Payload of a submitted put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upload {
    /// Bytes supplied with the request.
    Direct(Vec<u8>),
    /// A caller-owned file, read when the insert runs.
    Disk(PathBuf),
    /// A redirect pointing at an existing identifier.
    Redirect(InsertUri),
}

/// One put submission.
#[derive(Debug, Clone)]
pub struct PutSubmission {
    /// Request parameters.
    pub params: PutParams,
    /// Payload to insert.
    pub upload: Upload,
    /// Explicit content type; guessed from the file name when absent.
    pub content_type: Option<String>,
}

/// Counts from a startup restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Records brought back into the registry.
    pub restored: usize,
    /// Unfinished records whose insert was started again.
    pub started: usize,
    /// Records that could not be restored.
    pub skipped: usize,
}

/// Entry point for creating and managing persistent puts.
#[derive(Clone)]
pub struct PutService {
    registry: ClientRegistry,
    factory: Arc<dyn InserterFactory>,
    temp_store: TempStore,
    metrics: Metrics,
}

impl PutService {
    /// Wire the service to its collaborators.
    #[must_use]
    pub fn new(
        registry: ClientRegistry,
        factory: Arc<dyn InserterFactory>,
        temp_store: TempStore,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry,
            factory,
            temp_store,
            metrics,
        }
    }

    /// Registry holding live requests.
    #[must_use]
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Create a request from `submission` and start it.
    ///
    /// Direct data for reboot-persistent requests is staged into encrypted
    /// temporary storage so it survives a restart.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Collision`] when the identifier is live and
    /// [`SubmitError::Stage`] when direct data cannot be staged.
    pub async fn submit(&self, submission: PutSubmission) -> Result<Arc<PutRequest>, SubmitError> {
        let PutSubmission {
            params,
            upload,
            content_type,
        } = submission;
        let source = match upload {
            Upload::Direct(bytes) if params.persistence.is_written_to_disk() => {
                UploadSource::Direct(self.temp_store.stage(&bytes)?)
            }
            Upload::Direct(bytes) => UploadSource::Direct(DataHandle::memory(bytes)),
            Upload::Disk(path) => UploadSource::Disk { path },
            Upload::Redirect(target) => UploadSource::Redirect { target },
        };

        let request = PutRequest::create(
            params,
            source,
            content_type,
            self.factory.as_ref(),
            self.registry_handle(),
        )?;
        self.metrics.inc_request(RequestOutcome::Created);
        if !request.is_finished() {
            request.start().await;
            self.metrics.inc_request(RequestOutcome::Started);
        }
        info!(
            client = %request.identity().client,
            identifier = %request.identity().identifier,
            kind = request.kind().as_str(),
            persistence = request.persistence().as_str(),
            "put submitted"
        );
        Ok(request)
    }

    /// Bring back every stored request and start the unfinished ones.
    /// Records that fail to restore are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when the store directory cannot be listed.
    pub async fn restore_persisted(&self) -> Result<RestoreReport, LoadError> {
        let Some(store) = self.registry.store() else {
            return Ok(RestoreReport::default());
        };
        let documents = store.load_all().await?;

        let mut report = RestoreReport::default();
        let mut pending = Vec::new();
        for document in documents {
            let restored = PersistedPut::decode(document.document)
                .map_err(RestoreError::from)
                .and_then(|persisted| {
                    PutRequest::restore(
                        persisted,
                        &self.temp_store,
                        self.factory.as_ref(),
                        self.registry_handle(),
                    )
                });
            match restored {
                Ok(request) => {
                    report.restored += 1;
                    if !request.is_finished() {
                        pending.push(request);
                    }
                }
                Err(err) => {
                    warn!(
                        path = %document.path.display(),
                        error = ?err,
                        "skipping persisted request"
                    );
                    report.skipped += 1;
                }
            }
        }

        for request in pending {
            request.start().await;
            self.metrics.inc_request(RequestOutcome::Started);
            report.started += 1;
        }
        info!(
            restored = report.restored,
            started = report.started,
            skipped = report.skipped,
            "persisted requests restored"
        );
        Ok(report)
    }

    /// Restart a failed request. `None` when no such request is live.
    pub async fn restart(&self, identity: &RequestIdentity) -> Option<bool> {
        let request = self.registry.get(identity)?;
        let restarted = request.restart().await;
        if restarted {
            self.metrics.inc_request(RequestOutcome::Restarted);
        }
        Some(restarted)
    }

    /// Remove a request; see [`ClientRegistry::remove`].
    pub async fn remove(&self, identity: &RequestIdentity) -> Option<Arc<PutRequest>> {
        self.registry.remove(identity).await
    }

    /// Look up a live request.
    #[must_use]
    pub fn get(&self, identity: &RequestIdentity) -> Option<Arc<PutRequest>> {
        self.registry.get(identity)
    }

    /// Requests owned by `client`.
    #[must_use]
    pub fn list(&self, client: &str) -> Vec<Arc<PutRequest>> {
        self.registry.list(client)
    }

    fn registry_handle(&self) -> Arc<dyn RequestRegistry> {
        Arc::new(self.registry.clone())
    }
}
