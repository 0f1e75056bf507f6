//! Ordered job queue backing the ticker.
//!
//! # Design
//! - Entries are ordered by `(due, priority, sequence)` in a `BTreeMap`, so the
//!   head of the map is always the next job to dispatch.
//! - A side index maps dedup keys to their slot; at most one queued entry per key.
//! - Merging never moves a due time later: the earlier request always wins.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use tokio::time::Instant;

/// Result produced by a scheduled job body.
pub type JobResult = anyhow::Result<()>;

/// Boxed job body handed to the worker pool.
pub(crate) type JobBody = Pin<Box<dyn Future<Output = JobResult> + Send + 'static>>;

/// Relative urgency of jobs that fall due at the same instant.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Dispatched ahead of anything else due at the same time.
    High,
    /// Default urgency.
    #[default]
    Normal,
    /// Dispatched after other jobs due at the same time.
    Low,
}

/// Caller-supplied token identifying a logically singular job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(Cow<'static, str>);

impl DedupKey {
    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DedupKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&'static str> for DedupKey {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for DedupKey {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

/// Result of a deduplicated scheduling request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// No entry held the key; a new entry was queued.
    Queued,
    /// An entry already held the key and absorbed the request.
    Merged {
        /// Whether the merge pulled the pending due time forward.
        rescheduled: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SlotKey {
    due: Instant,
    priority: JobPriority,
    seq: u64,
}

pub(crate) struct QueuedJob {
    key: Option<DedupKey>,
    body: JobBody,
}

impl QueuedJob {
    pub(crate) fn label(&self) -> Cow<'_, str> {
        self.key
            .as_ref()
            .map_or(Cow::Borrowed("anonymous"), |key| Cow::Borrowed(key.as_str()))
    }

    pub(crate) fn into_parts(self) -> (Option<DedupKey>, JobBody) {
        (self.key, self.body)
    }
}

#[derive(Default)]
pub(crate) struct JobQueue {
    slots: BTreeMap<SlotKey, QueuedJob>,
    keyed: HashMap<DedupKey, SlotKey>,
    next_seq: u64,
}

impl JobQueue {
    /// Queue an independent job. Returns `true` when the job became the head.
    pub(crate) fn push(&mut self, body: JobBody, due: Instant, priority: JobPriority) -> bool {
        let slot = self.next_slot(due, priority);
        self.slots.insert(slot, QueuedJob { key: None, body });
        self.is_head(slot)
    }

    /// Queue a job under `key`, merging with any entry already holding it.
    ///
    /// Returns the outcome and whether the head of the queue changed.
    pub(crate) fn push_deduped(
        &mut self,
        body: JobBody,
        key: DedupKey,
        due: Instant,
        priority: JobPriority,
    ) -> (ScheduleOutcome, bool) {
        let Some(existing) = self.keyed.get(&key).copied() else {
            let slot = self.next_slot(due, priority);
            self.keyed.insert(key.clone(), slot);
            self.slots.insert(
                slot,
                QueuedJob {
                    key: Some(key),
                    body,
                },
            );
            return (ScheduleOutcome::Queued, self.is_head(slot));
        };

        // The queued body is kept; the new one is dropped.
        drop(body);
        let merged_due = existing.due.min(due);
        let merged_priority = existing.priority.min(priority);
        if merged_due == existing.due && merged_priority == existing.priority {
            return (ScheduleOutcome::Merged { rescheduled: false }, false);
        }

        let Some(job) = self.slots.remove(&existing) else {
            self.keyed.remove(&key);
            return (ScheduleOutcome::Merged { rescheduled: false }, false);
        };
        let slot = SlotKey {
            due: merged_due,
            priority: merged_priority,
            seq: existing.seq,
        };
        self.slots.insert(slot, job);
        self.keyed.insert(key, slot);
        (
            ScheduleOutcome::Merged {
                rescheduled: merged_due < existing.due,
            },
            self.is_head(slot),
        )
    }

    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.slots.first_key_value().map(|(slot, _)| slot.due)
    }

    /// Remove every job whose due time has arrived, in dispatch order.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<QueuedJob> {
        let mut due = Vec::new();
        while let Some(entry) = self.slots.first_entry() {
            if entry.key().due > now {
                break;
            }
            let job = entry.remove();
            if let Some(key) = &job.key {
                self.keyed.remove(key);
            }
            due.push(job);
        }
        due
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.keyed.clear();
    }

    fn next_slot(&mut self, due: Instant, priority: JobPriority) -> SlotKey {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        SlotKey { due, priority, seq }
    }

    fn is_head(&self, slot: SlotKey) -> bool {
        self.slots
            .first_key_value()
            .is_some_and(|(head, _)| *head == slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn noop() -> JobBody {
        Box::pin(async { Ok(()) })
    }

    fn labels(jobs: &[QueuedJob]) -> Vec<String> {
        jobs.iter().map(|job| job.label().into_owned()).collect()
    }

    #[test]
    fn pop_due_orders_by_time_then_priority() {
        let mut queue = JobQueue::default();
        let base = Instant::now();
        queue.push_deduped(noop(), "late".into(), base + Duration::from_millis(20), JobPriority::High);
        queue.push_deduped(noop(), "low".into(), base, JobPriority::Low);
        queue.push_deduped(noop(), "high".into(), base, JobPriority::High);
        queue.push_deduped(noop(), "normal".into(), base, JobPriority::Normal);

        let due = queue.pop_due(base);
        assert_eq!(labels(&due), vec!["high", "normal", "low"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(), Some(base + Duration::from_millis(20)));
    }

    #[test]
    fn independent_jobs_coexist_at_identical_times() {
        let mut queue = JobQueue::default();
        let due = Instant::now();
        assert!(queue.push(noop(), due, JobPriority::Normal));
        assert!(!queue.push(noop(), due, JobPriority::Normal));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_due(due).len(), 2);
    }

    #[test]
    fn later_request_never_pushes_back_pending_entry() {
        let mut queue = JobQueue::default();
        let base = Instant::now();
        let early = base + Duration::from_millis(100);
        let late = base + Duration::from_millis(150);

        let (outcome, _) = queue.push_deduped(noop(), "k".into(), early, JobPriority::Normal);
        assert_eq!(outcome, ScheduleOutcome::Queued);
        let (outcome, head_moved) =
            queue.push_deduped(noop(), "k".into(), late, JobPriority::Normal);
        assert_eq!(outcome, ScheduleOutcome::Merged { rescheduled: false });
        assert!(!head_moved);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(), Some(early));
    }

    #[test]
    fn earlier_request_promotes_pending_entry() {
        let mut queue = JobQueue::default();
        let base = Instant::now();
        let early = base + Duration::from_millis(100);
        let late = base + Duration::from_millis(150);

        queue.push_deduped(noop(), "k".into(), late, JobPriority::Normal);
        let (outcome, head_moved) =
            queue.push_deduped(noop(), "k".into(), early, JobPriority::Normal);
        assert_eq!(outcome, ScheduleOutcome::Merged { rescheduled: true });
        assert!(head_moved);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(), Some(early));
    }

    #[test]
    fn merge_takes_more_urgent_priority() {
        let mut queue = JobQueue::default();
        let due = Instant::now();
        queue.push_deduped(noop(), "other".into(), due, JobPriority::Normal);
        queue.push_deduped(noop(), "k".into(), due, JobPriority::Low);
        let (outcome, head_moved) = queue.push_deduped(noop(), "k".into(), due, JobPriority::High);
        assert_eq!(outcome, ScheduleOutcome::Merged { rescheduled: false });
        assert!(head_moved);
        assert_eq!(labels(&queue.pop_due(due)), vec!["k", "other"]);
    }

    #[test]
    fn key_is_free_again_after_dispatch() {
        let mut queue = JobQueue::default();
        let due = Instant::now();
        queue.push_deduped(noop(), "k".into(), due, JobPriority::Normal);
        assert_eq!(queue.pop_due(due).len(), 1);
        let (outcome, _) = queue.push_deduped(noop(), "k".into(), due, JobPriority::Normal);
        assert_eq!(outcome, ScheduleOutcome::Queued);
    }

    #[test]
    fn clear_drops_entries_and_keys() {
        let mut queue = JobQueue::default();
        let due = Instant::now();
        queue.push_deduped(noop(), "k".into(), due, JobPriority::Normal);
        queue.clear();
        assert_eq!(queue.len(), 0);
        assert!(queue.next_due().is_none());
        let (outcome, _) = queue.push_deduped(noop(), "k".into(), due, JobPriority::Normal);
        assert_eq!(outcome, ScheduleOutcome::Queued);
    }
}
