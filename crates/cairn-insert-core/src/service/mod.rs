//! Inserter contract implemented by network adapters.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::debug;

use crate::data::DataReader;
use crate::error::InsertError;
use crate::model::{InsertUri, PriorityClass, PutFlags, RequestIdentity};

/// Sequence number of one start or restart of a request.
pub type AttemptId = u64;

/// Everything an inserter needs to push one request into the network.
#[derive(Debug, Clone)]
pub struct InsertJob {
    /// Identity of the owning request.
    pub identity: RequestIdentity,
    /// Target identifier pattern.
    pub uri: InsertUri,
    /// Priority class.
    pub priority_class: PriorityClass,
    /// Retry budget; `-1` retries forever.
    pub max_retries: i32,
    /// Inserter switches.
    pub flags: PutFlags,
    /// Content type attached to the data; absent for redirect descriptors.
    pub content_type: Option<String>,
    /// File name attached to the inserted data.
    pub target_filename: Option<String>,
    /// Payload, absent for restored records whose data was already freed.
    pub data: Option<DataReader>,
    /// Whether the payload is a redirect descriptor rather than user content.
    pub is_metadata: bool,
    /// Progress snapshot restored from the request store.
    pub progress: Option<serde_json::Value>,
}

/// Receiver of insert outcomes, implemented by the request record.
pub trait CompletionSink: Send + Sync {
    /// Deliver the outcome of attempt `attempt`.
    fn complete(&self, attempt: AttemptId, outcome: Result<InsertUri, InsertError>);
}

/// Single-fire slot an inserter resolves when an attempt finishes.
///
/// Resolving consumes the slot, so at most one outcome is reported per
/// attempt. Dropping it unresolved reports nothing.
pub struct InsertCompletion {
    sink: Weak<dyn CompletionSink>,
    attempt: AttemptId,
}

impl fmt::Debug for InsertCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsertCompletion")
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

impl InsertCompletion {
    /// Bind a completion slot to `sink` for one attempt.
    #[must_use]
    pub fn new(sink: Weak<dyn CompletionSink>, attempt: AttemptId) -> Self {
        Self { sink, attempt }
    }

    /// Attempt this slot belongs to.
    #[must_use]
    pub const fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Report success with the generated identifier.
    pub fn succeed(self, uri: InsertUri) {
        self.resolve(Ok(uri));
    }

    /// Report a terminal failure.
    pub fn fail(self, error: InsertError) {
        self.resolve(Err(error));
    }

    fn resolve(self, outcome: Result<InsertUri, InsertError>) {
        match self.sink.upgrade() {
            Some(sink) => sink.complete(self.attempt, outcome),
            None => debug!(attempt = self.attempt, "completion target dropped"),
        }
    }
}

/// Network inserter driving one request.
#[async_trait]
pub trait Inserter: Send + Sync {
    /// Begin the first attempt. Returns once work is handed off; the outcome
    /// arrives through `completion`.
    ///
    /// # Errors
    ///
    /// Returns [`InsertError`] when the attempt cannot even begin. The
    /// completion slot must not be resolved in that case.
    async fn start(
        &self,
        early_encode: bool,
        completion: InsertCompletion,
    ) -> Result<(), InsertError>;

    /// Begin a fresh attempt after a restartable failure. `Ok(false)` means
    /// the inserter had nothing to restart.
    ///
    /// # Errors
    ///
    /// Returns [`InsertError`] when the attempt cannot even begin.
    async fn restart(
        &self,
        early_encode: bool,
        completion: InsertCompletion,
    ) -> Result<bool, InsertError>;

    /// Whether the last failure leaves the insert in a restartable state.
    fn can_restart(&self) -> bool;

    /// Opaque progress snapshot persisted alongside the request.
    fn progress_snapshot(&self) -> serde_json::Value;

    /// Abort a running attempt; the outcome is reported as
    /// [`InsertError::Cancelled`].
    async fn cancel(&self);
}

/// Builds inserters for newly created or restored requests.
pub trait InserterFactory: Send + Sync {
    /// Create the inserter for `job`.
    fn create(&self, job: InsertJob) -> Arc<dyn Inserter>;
}
