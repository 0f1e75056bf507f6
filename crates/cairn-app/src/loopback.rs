//! Inserter that completes locally through the scheduler.
//!
//! Content-hash targets resolve to `CHK@<sha256 of the data>`; keyed targets
//! resolve to themselves. Nothing leaves the process.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cairn_insert_core::{
    AttemptId, InsertCompletion, InsertError, InsertJob, InsertUri, Inserter, InserterFactory,
};
use cairn_ticker::{JobPriority, JobResult, PriorityTicker};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct LoopbackState {
    pending: Option<InsertCompletion>,
    attempts: u32,
    last_failure: Option<InsertError>,
    last_uri: Option<InsertUri>,
}

/// Local stand-in for the network inserter.
pub struct LoopbackInserter {
    job: InsertJob,
    ticker: PriorityTicker,
    delay: Duration,
    state: Arc<Mutex<LoopbackState>>,
}

fn lock(state: &Mutex<LoopbackState>) -> MutexGuard<'_, LoopbackState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackInserter {
    /// Inserter for `job` completing `delay` after each attempt begins.
    #[must_use]
    pub fn new(job: InsertJob, ticker: PriorityTicker, delay: Duration) -> Self {
        let attempts = job
            .progress
            .as_ref()
            .and_then(|progress| progress.get("attempts"))
            .and_then(Value::as_u64)
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or(0);
        Self {
            job,
            ticker,
            delay,
            state: Arc::new(Mutex::new(LoopbackState {
                attempts,
                ..LoopbackState::default()
            })),
        }
    }

    fn launch(&self, completion: InsertCompletion) -> Result<(), InsertError> {
        let attempt = completion.attempt();
        {
            let mut state = lock(&self.state);
            if let Some(previous) = state.pending.replace(completion) {
                debug!(attempt = previous.attempt(), "superseding unfinished attempt");
            }
            state.attempts = state.attempts.saturating_add(1);
            state.last_failure = None;
        }

        let state = Arc::clone(&self.state);
        let job = self.job.clone();
        let priority = if job.priority_class.get() <= 2 {
            JobPriority::High
        } else {
            JobPriority::Normal
        };
        self.ticker
            .schedule_with_priority(run_attempt(state, job, attempt), self.delay, priority)
            .map_err(|err| {
                lock(&self.state).pending = None;
                InsertError::internal(err)
            })
    }
}

async fn run_attempt(
    state: Arc<Mutex<LoopbackState>>,
    job: InsertJob,
    attempt: AttemptId,
) -> JobResult {
    if !lock(&state)
        .pending
        .as_ref()
        .is_some_and(|pending| pending.attempt() == attempt)
    {
        return Ok(());
    }
    let outcome = match &job.data {
        Some(reader) => reader.read_all().await.and_then(|bytes| derive_uri(&job, &bytes)),
        None => Err(InsertError::internal("insert has no data")),
    };

    let completion = {
        let mut state = lock(&state);
        match state.pending.take() {
            Some(pending) if pending.attempt() == attempt => {
                match &outcome {
                    Ok(uri) => state.last_uri = Some(uri.clone()),
                    Err(err) => state.last_failure = Some(err.clone()),
                }
                pending
            }
            other => {
                state.pending = other;
                return Ok(());
            }
        }
    };
    match outcome {
        Ok(uri) => completion.succeed(uri),
        Err(err) => {
            warn!(identifier = %job.identity.identifier, error = %err, "loopback insert failed");
            completion.fail(err);
        }
    }
    Ok(())
}

fn derive_uri(job: &InsertJob, bytes: &[u8]) -> Result<InsertUri, InsertError> {
    if !job.uri.is_content_hash() && !job.flags.get_chk_only {
        return Ok(job.uri.clone());
    }
    let digest = Sha256::digest(bytes);
    let mut uri = format!("CHK@{}", hex::encode(digest));
    if let Some(name) = &job.target_filename {
        uri.push('/');
        uri.push_str(name);
    }
    InsertUri::parse(uri).map_err(InsertError::internal)
}

#[async_trait]
impl Inserter for LoopbackInserter {
    async fn start(
        &self,
        _early_encode: bool,
        completion: InsertCompletion,
    ) -> Result<(), InsertError> {
        self.launch(completion)
    }

    async fn restart(
        &self,
        _early_encode: bool,
        completion: InsertCompletion,
    ) -> Result<bool, InsertError> {
        self.launch(completion).map(|()| true)
    }

    fn can_restart(&self) -> bool {
        let state = lock(&self.state);
        state.pending.is_none()
            && state
                .last_failure
                .as_ref()
                .is_some_and(InsertError::is_retryable)
    }

    fn progress_snapshot(&self) -> Value {
        let state = lock(&self.state);
        json!({
            "attempts": state.attempts,
            "last_uri": state.last_uri.as_ref().map(InsertUri::as_str),
        })
    }

    async fn cancel(&self) {
        let pending = {
            let mut state = lock(&self.state);
            let pending = state.pending.take();
            if pending.is_some() {
                state.last_failure = Some(InsertError::Cancelled);
            }
            pending
        };
        if let Some(completion) = pending {
            completion.fail(InsertError::Cancelled);
        }
    }
}

/// Builds [`LoopbackInserter`]s sharing one scheduler.
#[derive(Clone)]
pub struct LoopbackInserterFactory {
    ticker: PriorityTicker,
    delay: Duration,
}

impl LoopbackInserterFactory {
    /// Factory whose inserters complete `delay` after each attempt begins.
    #[must_use]
    pub const fn new(ticker: PriorityTicker, delay: Duration) -> Self {
        Self { ticker, delay }
    }
}

impl InserterFactory for LoopbackInserterFactory {
    fn create(&self, job: InsertJob) -> Arc<dyn Inserter> {
        Arc::new(LoopbackInserter::new(job, self.ticker.clone(), self.delay))
    }
}

#[cfg(test)]
mod tests {
    use cairn_insert_core::{DataHandle, PriorityClass, PutFlags, RequestIdentity};
    use cairn_ticker::TickerConfig;

    use super::*;

    fn job(uri: &str, data: Option<&DataHandle>) -> InsertJob {
        InsertJob {
            identity: RequestIdentity::new("alice", "doc"),
            uri: InsertUri::parse(uri).expect("uri"),
            priority_class: PriorityClass::default(),
            max_retries: 0,
            flags: PutFlags::default(),
            content_type: None,
            target_filename: None,
            data: data.map(DataHandle::reader),
            is_metadata: false,
            progress: None,
        }
    }

    #[test]
    fn content_hash_targets_hash_the_data() {
        let uri = derive_uri(&job("CHK@", None), b"abc").expect("uri");
        assert_eq!(
            uri.as_str(),
            "CHK@ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn keyed_targets_resolve_to_themselves() {
        let uri = derive_uri(&job("SSK@key/site", None), b"abc").expect("uri");
        assert_eq!(uri.as_str(), "SSK@key/site");

        let mut chk_only = job("SSK@key/site", None);
        chk_only.flags.get_chk_only = true;
        assert!(derive_uri(&chk_only, b"abc").expect("uri").is_content_hash());
    }

    #[test]
    fn target_filename_is_appended() {
        let mut named = job("CHK@", None);
        named.target_filename = Some("index.html".into());
        assert!(derive_uri(&named, b"").expect("uri").as_str().ends_with("/index.html"));
    }

    #[tokio::test]
    async fn progress_restores_attempt_count() {
        let ticker = PriorityTicker::spawn(TickerConfig::default());
        let mut restored = job("CHK@", None);
        restored.progress = Some(json!({ "attempts": 3 }));
        let inserter = LoopbackInserter::new(restored, ticker, Duration::ZERO);
        assert_eq!(inserter.progress_snapshot()["attempts"], 3);
        assert!(!inserter.can_restart());
    }
}
