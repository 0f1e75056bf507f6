//! Scripted inserter doubles that hand completion slots back to the test.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cairn_insert_core::{
    InsertCompletion, InsertError, InsertJob, InsertUri, Inserter, InserterFactory,
};
use serde_json::{Value, json};

/// Call observed by a [`ScriptedInserter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InserterCall {
    /// `start` was invoked.
    Start,
    /// `restart` was invoked.
    Restart,
    /// `cancel` was invoked.
    Cancel,
}

/// Behaviour applied to the next calls of a [`ScriptedInserter`].
#[derive(Debug, Clone)]
pub struct InserterScript {
    /// Refuse the next `start` with this error.
    pub fail_start: Option<InsertError>,
    /// Refuse the next `restart` with this error.
    pub fail_restart: Option<InsertError>,
    /// Answer for `can_restart`.
    pub restartable: bool,
    /// Value returned by a successful `restart`.
    pub restart_result: bool,
}

impl Default for InserterScript {
    fn default() -> Self {
        Self {
            fail_start: None,
            fail_restart: None,
            restartable: true,
            restart_result: true,
        }
    }
}

/// Inserter that never touches the network. Every accepted attempt parks its
/// completion slot until the test resolves it.
#[derive(Debug)]
pub struct ScriptedInserter {
    job: InsertJob,
    script: Mutex<InserterScript>,
    pending: Mutex<Vec<InsertCompletion>>,
    calls: Mutex<Vec<InserterCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedInserter {
    /// Build an inserter for `job` following `script`.
    #[must_use]
    pub fn new(job: InsertJob, script: InserterScript) -> Self {
        Self {
            job,
            script: Mutex::new(script),
            pending: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Job the inserter was created for.
    #[must_use]
    pub fn job(&self) -> &InsertJob {
        &self.job
    }

    /// Change the `can_restart` answer.
    pub fn set_restartable(&self, restartable: bool) {
        lock(&self.script).restartable = restartable;
    }

    /// Refuse the next `start`.
    pub fn fail_next_start(&self, error: InsertError) {
        lock(&self.script).fail_start = Some(error);
    }

    /// Refuse the next `restart`.
    pub fn fail_next_restart(&self, error: InsertError) {
        lock(&self.script).fail_restart = Some(error);
    }

    /// Calls seen so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<InserterCall> {
        lock(&self.calls).clone()
    }

    /// Completion slots not yet resolved.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Take the most recent unresolved completion slot.
    #[must_use]
    pub fn take_completion(&self) -> Option<InsertCompletion> {
        lock(&self.pending).pop()
    }

    /// Take the oldest unresolved completion slot.
    #[must_use]
    pub fn take_oldest_completion(&self) -> Option<InsertCompletion> {
        let mut pending = lock(&self.pending);
        (!pending.is_empty()).then(|| pending.remove(0))
    }

    /// Resolve the latest attempt with success. Returns `false` when nothing
    /// was pending.
    pub fn succeed_latest(&self, uri: InsertUri) -> bool {
        self.take_completion()
            .map(|completion| completion.succeed(uri))
            .is_some()
    }

    /// Resolve the latest attempt with `error`. Returns `false` when nothing
    /// was pending.
    pub fn fail_latest(&self, error: InsertError) -> bool {
        self.take_completion()
            .map(|completion| completion.fail(error))
            .is_some()
    }

    fn record(&self, call: InserterCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl Inserter for ScriptedInserter {
    async fn start(
        &self,
        _early_encode: bool,
        completion: InsertCompletion,
    ) -> Result<(), InsertError> {
        self.record(InserterCall::Start);
        if let Some(error) = lock(&self.script).fail_start.take() {
            return Err(error);
        }
        lock(&self.pending).push(completion);
        Ok(())
    }

    async fn restart(
        &self,
        _early_encode: bool,
        completion: InsertCompletion,
    ) -> Result<bool, InsertError> {
        self.record(InserterCall::Restart);
        let restarted = {
            let mut script = lock(&self.script);
            if let Some(error) = script.fail_restart.take() {
                return Err(error);
            }
            script.restart_result
        };
        lock(&self.pending).push(completion);
        Ok(restarted)
    }

    fn can_restart(&self) -> bool {
        lock(&self.script).restartable
    }

    fn progress_snapshot(&self) -> Value {
        let attempts = lock(&self.calls)
            .iter()
            .filter(|call| !matches!(call, InserterCall::Cancel))
            .count();
        json!({ "attempts": attempts })
    }

    async fn cancel(&self) {
        self.record(InserterCall::Cancel);
        let pending: Vec<InsertCompletion> = lock(&self.pending).drain(..).collect();
        for completion in pending {
            completion.fail(InsertError::Cancelled);
        }
    }
}

/// Factory that remembers every inserter it builds.
#[derive(Debug, Default)]
pub struct ScriptedInserterFactory {
    script: Mutex<InserterScript>,
    created: Mutex<Vec<Arc<ScriptedInserter>>>,
}

impl ScriptedInserterFactory {
    /// Factory whose inserters start from the default script.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Factory whose inserters start from `script`.
    #[must_use]
    pub fn with_script(script: InserterScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            created: Mutex::new(Vec::new()),
        })
    }

    /// Number of inserters built.
    #[must_use]
    pub fn created_count(&self) -> usize {
        lock(&self.created).len()
    }

    /// Most recently built inserter.
    #[must_use]
    pub fn last(&self) -> Option<Arc<ScriptedInserter>> {
        lock(&self.created).last().cloned()
    }

    /// Most recently built inserter for `identifier`.
    #[must_use]
    pub fn for_identifier(&self, identifier: &str) -> Option<Arc<ScriptedInserter>> {
        lock(&self.created)
            .iter()
            .rev()
            .find(|inserter| inserter.job.identity.identifier == identifier)
            .cloned()
    }
}

impl InserterFactory for ScriptedInserterFactory {
    fn create(&self, job: InsertJob) -> Arc<dyn Inserter> {
        let inserter = Arc::new(ScriptedInserter::new(job, lock(&self.script).clone()));
        lock(&self.created).push(Arc::clone(&inserter));
        inserter
    }
}
