#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Priority ticker: deferred execution ordered by due time and priority.
//!
//! A single coordinator task sleeps until the earliest pending due time (or
//! until a newly queued entry moves that time forward), pops every job that
//! has fallen due, and hands each one to a bounded worker pool. A job stops
//! counting as queued the moment it is handed off, even while its body runs.
//!
//! Layout: `queue.rs` (ordering and dedup bookkeeping), `error.rs` (caller
//! facing errors).

pub mod error;
mod queue;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

pub use error::{TickerError, TickerResult};
pub use queue::{DedupKey, JobPriority, JobResult, ScheduleOutcome};

use queue::{JobBody, JobQueue, QueuedJob};

/// Default number of job bodies allowed to run concurrently.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Far-future horizon used when a requested delay overflows the clock.
const MAX_DELAY: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Tuning knobs for a ticker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickerConfig {
    /// Upper bound on concurrently running job bodies.
    pub max_workers: usize,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

/// Handle to a running priority ticker. Cloning shares the same queue.
#[derive(Clone)]
pub struct PriorityTicker {
    shared: Arc<Shared>,
    _dispatcher: Arc<DispatcherHandle>,
}

struct Shared {
    queue: Mutex<JobQueue>,
    wake: Notify,
    workers: Arc<Semaphore>,
    stopped: AtomicBool,
    dispatched: AtomicU64,
}

struct DispatcherHandle(JoinHandle<()>);

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl PriorityTicker {
    /// Spawn the coordinator task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn spawn(config: TickerConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(JobQueue::default()),
            wake: Notify::new(),
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            stopped: AtomicBool::new(false),
            dispatched: AtomicU64::new(0),
        });
        let handle = tokio::spawn(dispatch_loop(Arc::clone(&shared)));
        Self {
            shared,
            _dispatcher: Arc::new(DispatcherHandle(handle)),
        }
    }

    /// Run `job` no earlier than `delay` from now.
    ///
    /// # Errors
    ///
    /// Returns [`TickerError::Stopped`] once the ticker has been shut down.
    pub fn schedule<F>(&self, job: F, delay: Duration) -> TickerResult<()>
    where
        F: Future<Output = JobResult> + Send + 'static,
    {
        self.schedule_with_priority(job, delay, JobPriority::Normal)
    }

    /// Run `job` no earlier than `delay` from now with an explicit priority.
    ///
    /// # Errors
    ///
    /// Returns [`TickerError::Stopped`] once the ticker has been shut down.
    pub fn schedule_with_priority<F>(
        &self,
        job: F,
        delay: Duration,
        priority: JobPriority,
    ) -> TickerResult<()>
    where
        F: Future<Output = JobResult> + Send + 'static,
    {
        self.ensure_running()?;
        let due = due_after(delay);
        let became_head = self.shared.lock_queue().push(Box::pin(job), due, priority);
        if became_head {
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    /// Run `job` under `key`, merging with a queued entry holding the same key.
    ///
    /// The merged entry keeps the earlier of the two due times, so a later
    /// request never delays a pending one and an earlier request pulls it
    /// forward.
    ///
    /// # Errors
    ///
    /// Returns [`TickerError::Stopped`] once the ticker has been shut down.
    pub fn schedule_deduped<F>(
        &self,
        job: F,
        key: impl Into<DedupKey>,
        delay: Duration,
    ) -> TickerResult<ScheduleOutcome>
    where
        F: Future<Output = JobResult> + Send + 'static,
    {
        self.schedule_deduped_with_priority(job, key, delay, JobPriority::Normal)
    }

    /// Deduplicated scheduling with an explicit priority. The merged entry
    /// takes the more urgent of the two priorities.
    ///
    /// # Errors
    ///
    /// Returns [`TickerError::Stopped`] once the ticker has been shut down.
    pub fn schedule_deduped_with_priority<F>(
        &self,
        job: F,
        key: impl Into<DedupKey>,
        delay: Duration,
        priority: JobPriority,
    ) -> TickerResult<ScheduleOutcome>
    where
        F: Future<Output = JobResult> + Send + 'static,
    {
        self.ensure_running()?;
        let due = due_after(delay);
        let body: JobBody = Box::pin(job);
        let (outcome, head_moved) =
            self.shared
                .lock_queue()
                .push_deduped(body, key.into(), due, priority);
        if head_moved {
            self.shared.wake.notify_one();
        }
        Ok(outcome)
    }

    /// Number of entries not yet handed to the worker pool.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.shared.lock_queue().len()
    }

    /// Total number of jobs handed to the worker pool since spawn.
    #[must_use]
    pub fn dispatched_count(&self) -> u64 {
        self.shared.dispatched.load(Ordering::Relaxed)
    }

    /// Whether the ticker still accepts jobs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shared.stopped.load(Ordering::Acquire)
    }

    /// Stop the coordinator and drop every undispatched job.
    pub fn shutdown(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut queue = self.shared.lock_queue();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        self.shared.workers.close();
        self.shared.wake.notify_one();
        debug!(dropped, "priority ticker shutting down");
    }

    fn ensure_running(&self) -> TickerResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(TickerError::Stopped)
        }
    }
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, JobQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hand_off(&self, job: QueuedJob) {
        let label = job.label().into_owned();
        let (_, body) = job.into_parts();
        let workers = Arc::clone(&self.workers);
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                debug!(job = %label, "worker pool closed before job could run");
                return;
            };
            match tokio::spawn(body).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(job = %label, error = %err, "scheduled job failed"),
                Err(err) if err.is_panic() => error!(job = %label, "scheduled job panicked"),
                Err(err) => debug!(job = %label, error = %err, "scheduled job cancelled"),
            }
        });
    }
}

async fn dispatch_loop(shared: Arc<Shared>) {
    loop {
        if shared.stopped.load(Ordering::Acquire) {
            break;
        }
        let (due, next) = {
            let mut queue = shared.lock_queue();
            let due = queue.pop_due(Instant::now());
            (due, queue.next_due())
        };
        for job in due {
            shared.hand_off(job);
        }
        match next {
            Some(deadline) => {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {}
                    () = shared.wake.notified() => {}
                }
            }
            None => shared.wake.notified().await,
        }
    }
    debug!("priority ticker dispatcher stopped");
}

fn due_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .unwrap_or_else(|| now + MAX_DELAY)
}
