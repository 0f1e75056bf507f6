//! Persistent insert request: construction, lifecycle and durable form.
//!
//! Status lives behind a per-record mutex. The lock is never held across an
//! inserter call, so completions may arrive from any task, including from
//! inside `start` itself.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use cairn_events::{DataSourceKind, Event, PersistenceMode, PutNotice};
use cairn_insert_core::{
    AttemptId, CollisionError, CompletionSink, DataHandle, InsertCompletion, InsertError,
    InsertJob, InsertUri, Inserter, InserterFactory, PriorityClass, PutParams,
    RedirectDescriptor, RequestIdentity, TempStore, UploadSource, resolve,
    resolve_content_type,
};
use cairn_runtime::{PersistedPut, PersistedSource, PersistedTemp, SCHEMA_VERSION};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::RestoreError;
use crate::registry::RequestRegistry;

/// Where a request's bytes came from, with the kind-specific detail.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    Direct,
    Disk { path: PathBuf },
    Redirect { target: InsertUri },
}

impl Origin {
    const fn kind(&self) -> DataSourceKind {
        match self {
            Self::Direct => DataSourceKind::Direct,
            Self::Disk { .. } => DataSourceKind::Disk,
            Self::Redirect { .. } => DataSourceKind::Redirect,
        }
    }
}

#[derive(Debug, Default)]
struct PutState {
    started: bool,
    finished: bool,
    succeeded: bool,
    final_uri: Option<InsertUri>,
    failure: Option<InsertError>,
    attempt: AttemptId,
    data: Option<DataHandle>,
    finished_size: u64,
}

impl PutState {
    fn data_size(&self) -> u64 {
        self.data
            .as_ref()
            .map_or(self.finished_size, DataHandle::size)
    }
}

/// Status fields captured together under the record lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutStatus {
    /// Client scope owning the request.
    pub client: String,
    /// Request identifier.
    pub identifier: String,
    /// An attempt has been made.
    pub started: bool,
    /// The last attempt reached a terminal state.
    pub finished: bool,
    /// The last attempt succeeded.
    pub succeeded: bool,
    /// Generated identifier, once succeeded.
    pub final_uri: Option<String>,
    /// Failure of the last attempt.
    pub failure: Option<InsertError>,
    /// Current (or captured, once freed) data size.
    pub data_size: u64,
}

struct Blueprint {
    params: PutParams,
    origin: Origin,
    content_type: Option<String>,
    data: Option<DataHandle>,
    is_metadata: bool,
    progress: Option<serde_json::Value>,
    state: PutState,
}

/// One persistent insert request.
pub struct PutRequest {
    params: PutParams,
    origin: Origin,
    content_type: Option<String>,
    inserter: Option<Arc<dyn Inserter>>,
    registry: Arc<dyn RequestRegistry>,
    state: Mutex<PutState>,
    this: Weak<PutRequest>,
}

impl fmt::Debug for PutRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutRequest")
            .field("identity", &self.params.identity)
            .field("uri", &self.params.uri)
            .field("origin", &self.origin)
            .field("state", &*self.lock_state())
            .finish_non_exhaustive()
    }
}

impl PutRequest {
    /// Create a fresh request, register it (unless connection bound) and
    /// queue its first notification. The insert is not started.
    ///
    /// A redirect whose descriptor cannot be encoded still yields a record,
    /// already failed with [`InsertError::Internal`].
    ///
    /// # Errors
    ///
    /// Returns [`CollisionError`] when the identifier is already live in the
    /// client scope; the supplied data is released and no record exists.
    pub fn create(
        params: PutParams,
        source: UploadSource,
        content_type: Option<String>,
        factory: &dyn InserterFactory,
        registry: Arc<dyn RequestRegistry>,
    ) -> Result<Arc<Self>, CollisionError> {
        let origin = match &source {
            UploadSource::Direct(_) => Origin::Direct,
            UploadSource::Disk { path } => Origin::Disk { path: path.clone() },
            UploadSource::Redirect { target } => Origin::Redirect {
                target: target.clone(),
            },
        };
        let content_type = resolve_content_type(
            content_type.as_deref(),
            match &origin {
                Origin::Disk { path } => Some(path.as_path()),
                _ => None,
            },
            &params.identity.identifier,
        );

        let (blueprint, descriptor_error) = match resolve(source, Some(content_type)) {
            Ok(resolved) => (
                Blueprint {
                    params,
                    origin,
                    content_type: resolved.content_type,
                    data: Some(resolved.handle),
                    is_metadata: resolved.is_metadata,
                    progress: None,
                    state: PutState::default(),
                },
                None,
            ),
            Err(err) => (
                Blueprint {
                    params,
                    origin,
                    content_type: None,
                    data: None,
                    is_metadata: true,
                    progress: None,
                    state: PutState::default(),
                },
                Some(err),
            ),
        };

        let request = Self::build(blueprint, descriptor_error.is_none(), factory, registry);
        if request.is_registered()
            && let Err(err) = request
                .registry
                .register(Arc::clone(&request), request.params.global)
        {
            request.free_data();
            return Err(err);
        }

        if let Some(err) = descriptor_error {
            error!(
                client = %request.params.identity.client,
                identifier = %request.params.identity.identifier,
                error = %err,
                "redirect descriptor could not be built"
            );
            request.on_failure(0, InsertError::internal(format!("{err:?}")));
            return Ok(request);
        }

        if request.is_registered() {
            request.announce();
            request.persist();
        }
        debug!(
            client = %request.params.identity.client,
            identifier = %request.params.identity.identifier,
            kind = request.origin.kind().as_str(),
            "created request"
        );
        Ok(request)
    }

    /// Rebuild a request from its persisted form and register it. The insert
    /// is not started.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError::Parse`] when the temp source cannot be
    /// reattached and [`RestoreError::Collision`] when the identifier is live.
    pub fn restore(
        persisted: PersistedPut,
        temp_store: &TempStore,
        factory: &dyn InserterFactory,
        registry: Arc<dyn RequestRegistry>,
    ) -> Result<Arc<Self>, RestoreError> {
        let params = PutParams {
            identity: persisted.identity(),
            uri: persisted.uri.clone(),
            verbosity: persisted.verbosity,
            priority_class: persisted.priority_class,
            persistence: persisted.persistence,
            client_token: persisted.client_token.clone(),
            global: persisted.global,
            max_retries: persisted.max_retries,
            flags: persisted.flags(),
            target_filename: persisted.target_filename.clone(),
        };

        let mut descriptor_error = None;
        let (origin, data, is_metadata) = match persisted.source {
            PersistedSource::Direct { temp: Some(temp) } if !persisted.finished => {
                let handle = temp_store.reattach(&temp.filename, &temp.decrypt_key, temp.size)?;
                (Origin::Direct, Some(handle), false)
            }
            PersistedSource::Direct { .. } => (Origin::Direct, None, false),
            PersistedSource::Disk { filename } => {
                let path = PathBuf::from(filename);
                let handle = DataHandle::disk(path.clone());
                (Origin::Disk { path }, Some(handle), false)
            }
            PersistedSource::Redirect { target_uri } => {
                let descriptor = RedirectDescriptor {
                    target: target_uri.to_string(),
                    content_type: None,
                };
                let data = match descriptor.encode() {
                    Ok(bytes) => Some(DataHandle::memory(bytes)),
                    Err(err) => {
                        descriptor_error = Some(err);
                        None
                    }
                };
                (Origin::Redirect { target: target_uri }, data, true)
            }
        };

        let blueprint = Blueprint {
            params,
            origin,
            content_type: persisted.content_type,
            data,
            is_metadata,
            progress: persisted.progress,
            state: PutState {
                started: persisted.started,
                finished: persisted.finished,
                succeeded: persisted.succeeded,
                final_uri: persisted.final_uri,
                failure: persisted.failure,
                ..PutState::default()
            },
        };
        let request = Self::build(blueprint, descriptor_error.is_none(), factory, registry);
        if request.is_registered() {
            request
                .registry
                .register(Arc::clone(&request), request.params.global)?;
        }
        if let Some(err) = descriptor_error
            && !request.is_finished()
        {
            error!(
                client = %request.params.identity.client,
                identifier = %request.params.identity.identifier,
                error = %err,
                "redirect descriptor could not be rebuilt"
            );
            request.on_failure(0, InsertError::internal(format!("{err:?}")));
        }
        if request.is_registered() {
            request.announce();
        }
        debug!(
            client = %request.params.identity.client,
            identifier = %request.params.identity.identifier,
            "restored request"
        );
        Ok(request)
    }

    fn build(
        blueprint: Blueprint,
        with_inserter: bool,
        factory: &dyn InserterFactory,
        registry: Arc<dyn RequestRegistry>,
    ) -> Arc<Self> {
        let Blueprint {
            params,
            origin,
            content_type,
            data,
            is_metadata,
            progress,
            mut state,
        } = blueprint;
        let inserter = with_inserter.then(|| {
            factory.create(InsertJob {
                identity: params.identity.clone(),
                uri: params.uri.clone(),
                priority_class: params.priority_class,
                max_retries: params.max_retries,
                flags: params.flags,
                content_type: content_type.clone(),
                target_filename: params.target_filename.clone(),
                data: data.as_ref().map(DataHandle::reader),
                is_metadata,
                progress,
            })
        });
        state.data = data;
        Arc::new_cyclic(|this| Self {
            params,
            origin,
            content_type,
            inserter,
            registry,
            state: Mutex::new(state),
            this: this.clone(),
        })
    }

    /// Begin the first insert attempt. Does nothing once finished.
    ///
    /// `started` is set even when the inserter refuses to begin; that refusal
    /// is routed through the failure path rather than returned.
    pub async fn start(&self) {
        let attempt = {
            let mut state = self.lock_state();
            if state.finished {
                debug!(
                    client = %self.params.identity.client,
                    identifier = %self.params.identity.identifier,
                    "request already finished; not starting"
                );
                return;
            }
            state.attempt += 1;
            state.attempt
        };
        let Some(inserter) = self.inserter.clone() else {
            return;
        };
        debug!(
            client = %self.params.identity.client,
            identifier = %self.params.identity.identifier,
            attempt,
            "starting request"
        );
        let result = inserter
            .start(self.params.flags.early_encode, self.completion(attempt))
            .await;
        let finished = {
            let mut state = self.lock_state();
            state.started = true;
            state.finished
        };
        match result {
            Ok(()) => {
                if self.is_registered() && !finished {
                    self.announce();
                }
                self.persist();
            }
            Err(err) => {
                warn!(
                    client = %self.params.identity.client,
                    identifier = %self.params.identity.identifier,
                    error = %err,
                    "insert refused to start"
                );
                self.on_failure(attempt, err);
            }
        }
    }

    /// Record success of `attempt`. Stale or repeated reports are ignored.
    pub fn on_success(&self, attempt: AttemptId, uri: InsertUri) {
        self.settle(attempt, Ok(uri));
    }

    /// Record failure of `attempt`. The data handle is kept; release it with
    /// [`PutRequest::free_data`]. Stale or repeated reports are ignored.
    pub fn on_failure(&self, attempt: AttemptId, error: InsertError) {
        self.settle(attempt, Err(error));
    }

    fn settle(&self, attempt: AttemptId, outcome: Result<InsertUri, InsertError>) {
        let identity = &self.params.identity;
        let event = {
            let mut state = self.lock_state();
            if attempt != state.attempt {
                warn!(
                    client = %identity.client,
                    identifier = %identity.identifier,
                    attempt,
                    current = state.attempt,
                    "ignoring completion for a superseded attempt"
                );
                return;
            }
            if state.finished {
                error!(
                    client = %identity.client,
                    identifier = %identity.identifier,
                    attempt,
                    "completion reported twice for one attempt"
                );
                return;
            }
            state.finished = true;
            match outcome {
                Ok(uri) => {
                    info!(
                        client = %identity.client,
                        identifier = %identity.identifier,
                        uri = %uri,
                        "insert succeeded"
                    );
                    state.succeeded = true;
                    state.failure = None;
                    state.final_uri = Some(uri.clone());
                    Event::PutSuccessful {
                        client: identity.client.clone(),
                        identifier: identity.identifier.clone(),
                        final_uri: uri.to_string(),
                        global: self.params.global,
                    }
                }
                Err(err) => {
                    info!(
                        client = %identity.client,
                        identifier = %identity.identifier,
                        kind = err.kind(),
                        error = %err,
                        "insert failed"
                    );
                    let event = Event::PutFailed {
                        client: identity.client.clone(),
                        identifier: identity.identifier.clone(),
                        code: err.kind().to_string(),
                        detail: err.detail(),
                        fatal: !err.is_retryable(),
                        global: self.params.global,
                    };
                    state.failure = Some(err);
                    event
                }
            }
        };
        self.registry.enqueue_notification(event, Duration::ZERO);
        self.persist();
    }

    /// Capture the final data size and release the data handle. Later calls
    /// do nothing.
    pub fn free_data(&self) {
        let handle = {
            let mut state = self.lock_state();
            let Some(handle) = state.data.take() else {
                return;
            };
            state.finished_size = handle.size();
            handle
        };
        if let Err(err) = handle.release() {
            warn!(
                client = %self.params.identity.client,
                identifier = %self.params.identity.identifier,
                error = %err,
                "failed to release request data"
            );
        }
    }

    /// Whether the request failed and the inserter can try again.
    #[must_use]
    pub fn can_restart(&self) -> bool {
        let state = self.lock_state();
        self.restartable(&state)
    }

    fn restartable(&self, state: &PutState) -> bool {
        if !state.finished {
            debug!(identifier = %self.params.identity.identifier, "cannot restart: not finished");
            return false;
        }
        if state.succeeded {
            debug!(identifier = %self.params.identity.identifier, "cannot restart: succeeded");
            return false;
        }
        self.inserter
            .as_ref()
            .is_some_and(|inserter| inserter.can_restart())
    }

    /// Start a new attempt after a restartable failure.
    ///
    /// Returns `false`, leaving every field untouched, when the request cannot
    /// restart. A synchronous refusal from the inserter is routed through the
    /// failure path and also yields `false`.
    pub async fn restart(&self) -> bool {
        let attempt = {
            let mut state = self.lock_state();
            if !self.restartable(&state) {
                return false;
            }
            state.started = false;
            state.finished = false;
            state.succeeded = false;
            state.final_uri = None;
            state.failure = None;
            state.attempt += 1;
            state.attempt
        };
        let Some(inserter) = self.inserter.clone() else {
            return false;
        };
        match inserter
            .restart(self.params.flags.early_encode, self.completion(attempt))
            .await
        {
            Ok(restarted) => {
                if !restarted {
                    debug!(
                        identifier = %self.params.identity.identifier,
                        "inserter reported nothing to restart"
                    );
                }
                self.lock_state().started = true;
                info!(
                    client = %self.params.identity.client,
                    identifier = %self.params.identity.identifier,
                    attempt,
                    "request restarted"
                );
                self.persist();
                true
            }
            Err(err) => {
                self.on_failure(attempt, err);
                false
            }
        }
    }

    /// Ask the inserter to abandon the running attempt.
    pub async fn cancel(&self) {
        if let Some(inserter) = &self.inserter {
            inserter.cancel().await;
        }
    }

    /// Durable form of the request.
    #[must_use]
    pub fn serialize(&self) -> PersistedPut {
        let progress = self
            .inserter
            .as_ref()
            .map(|inserter| inserter.progress_snapshot())
            .filter(|snapshot| !snapshot.is_null());
        let state = self.lock_state();
        let source = match &self.origin {
            Origin::Direct => PersistedSource::Direct {
                temp: if state.finished {
                    None
                } else {
                    state
                        .data
                        .as_ref()
                        .and_then(DataHandle::temp_file)
                        .map(|temp| PersistedTemp {
                            decrypt_key: temp.key_hex(),
                            filename: temp.filename().to_string(),
                            size: temp.size(),
                        })
                },
            },
            Origin::Disk { path } => PersistedSource::Disk {
                filename: path.to_string_lossy().into_owned(),
            },
            Origin::Redirect { target } => PersistedSource::Redirect {
                target_uri: target.clone(),
            },
        };
        PersistedPut {
            version: SCHEMA_VERSION,
            identifier: self.params.identity.identifier.clone(),
            client_name: self.params.identity.client.clone(),
            uri: self.params.uri.clone(),
            priority_class: self.params.priority_class,
            persistence: self.params.persistence,
            verbosity: self.params.verbosity,
            client_token: self.params.client_token.clone(),
            max_retries: self.params.max_retries,
            global: self.params.global,
            get_chk_only: self.params.flags.get_chk_only,
            dont_compress: self.params.flags.dont_compress,
            early_encode: self.params.flags.early_encode,
            started: state.started,
            finished: state.finished,
            succeeded: state.succeeded,
            final_uri: state.final_uri.clone(),
            failure: state.failure.clone(),
            target_filename: self.params.target_filename.clone(),
            content_type: self.content_type.clone(),
            source,
            progress,
        }
    }

    /// Snapshot announced to clients at registration and after start.
    #[must_use]
    pub fn notice(&self) -> PutNotice {
        let state = self.lock_state();
        PutNotice {
            client: self.params.identity.client.clone(),
            identifier: self.params.identity.identifier.clone(),
            uri: self.params.uri.to_string(),
            verbosity: self.params.verbosity,
            priority_class: self.params.priority_class.get(),
            upload_from: self.origin.kind(),
            persistence: self.params.persistence,
            target_uri: self.target_uri().map(ToString::to_string),
            original_filename: self
                .original_filename()
                .map(|path| path.to_string_lossy().into_owned()),
            content_type: self.content_type.clone(),
            global: self.params.global,
            data_size: state.data_size(),
            client_token: self.params.client_token.clone(),
            started: state.started,
            max_retries: self.params.max_retries,
            target_filename: self.params.target_filename.clone(),
        }
    }

    /// Status fields captured atomically.
    #[must_use]
    pub fn status(&self) -> PutStatus {
        let state = self.lock_state();
        PutStatus {
            client: self.params.identity.client.clone(),
            identifier: self.params.identity.identifier.clone(),
            started: state.started,
            finished: state.finished,
            succeeded: state.succeeded,
            final_uri: state.final_uri.as_ref().map(ToString::to_string),
            failure: state.failure.clone(),
            data_size: state.data_size(),
        }
    }

    /// Identity of the request.
    #[must_use]
    pub fn identity(&self) -> &RequestIdentity {
        &self.params.identity
    }

    /// Target identifier pattern.
    #[must_use]
    pub fn uri(&self) -> &InsertUri {
        &self.params.uri
    }

    /// Priority class.
    #[must_use]
    pub fn priority_class(&self) -> PriorityClass {
        self.params.priority_class
    }

    /// Persistence mode.
    #[must_use]
    pub fn persistence(&self) -> PersistenceMode {
        self.params.persistence
    }

    /// Whether the request lives on the global queue.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.params.global
    }

    /// Source kind.
    #[must_use]
    pub fn kind(&self) -> DataSourceKind {
        self.origin.kind()
    }

    /// Caller-owned path of a disk insert.
    #[must_use]
    pub fn original_filename(&self) -> Option<&Path> {
        match &self.origin {
            Origin::Disk { path } => Some(path),
            _ => None,
        }
    }

    /// Redirect target of a redirect insert.
    #[must_use]
    pub fn target_uri(&self) -> Option<&InsertUri> {
        match &self.origin {
            Origin::Redirect { target } => Some(target),
            _ => None,
        }
    }

    /// Content type retained by the request; `None` for redirects.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// File name attached to the inserted data.
    #[must_use]
    pub fn target_filename(&self) -> Option<&str> {
        self.params.target_filename.as_deref()
    }

    /// An attempt has been made.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.lock_state().started
    }

    /// The last attempt reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lock_state().finished
    }

    /// The last attempt succeeded.
    #[must_use]
    pub fn has_succeeded(&self) -> bool {
        self.lock_state().succeeded
    }

    /// Generated identifier of a succeeded insert.
    #[must_use]
    pub fn final_uri(&self) -> Option<InsertUri> {
        self.lock_state().final_uri.clone()
    }

    /// Failure of the last attempt.
    #[must_use]
    pub fn failure(&self) -> Option<InsertError> {
        self.lock_state().failure.clone()
    }

    /// Size of the data, or the size captured when it was freed.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.lock_state().data_size()
    }

    /// Whether the data handle is still held.
    #[must_use]
    pub fn holds_data(&self) -> bool {
        self.lock_state().data.is_some()
    }

    fn is_registered(&self) -> bool {
        self.params.persistence.is_registered()
    }

    fn announce(&self) {
        self.registry
            .enqueue_notification(Event::PersistentPut(self.notice()), Duration::ZERO);
    }

    fn persist(&self) {
        if !self.params.persistence.is_written_to_disk() {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            self.registry.persist(&this);
        }
    }

    fn completion(&self, attempt: AttemptId) -> InsertCompletion {
        let sink: Weak<dyn CompletionSink> = self.this.clone();
        InsertCompletion::new(sink, attempt)
    }

    fn lock_state(&self) -> MutexGuard<'_, PutState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CompletionSink for PutRequest {
    fn complete(&self, attempt: AttemptId, outcome: Result<InsertUri, InsertError>) {
        match outcome {
            Ok(uri) => self.on_success(attempt, uri),
            Err(err) => self.on_failure(attempt, err),
        }
    }
}
