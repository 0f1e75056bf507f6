//! Client-scoped registry of live requests, notification fan-out and
//! coalesced persistence.

use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cairn_events::{Event, EventBus};
use cairn_insert_core::{CollisionError, RequestIdentity};
use cairn_runtime::RequestStore;
use cairn_telemetry::{Metrics, RequestOutcome};
use cairn_ticker::{PriorityTicker, ScheduleOutcome};
use tracing::{debug, info, warn};

use crate::put::PutRequest;

/// Default delay before a dirty request is written out.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(250);

/// Services a request calls back into.
pub trait RequestRegistry: Send + Sync {
    /// Add `request` to its client scope.
    ///
    /// # Errors
    ///
    /// Returns [`CollisionError`] when the identifier is already live.
    fn register(&self, request: Arc<PutRequest>, global: bool) -> Result<(), CollisionError>;

    /// Deliver `event` to subscribers after `delay`.
    fn enqueue_notification(&self, event: Event, delay: Duration);

    /// Note that `request` changed and should be written out.
    fn persist(&self, request: &Arc<PutRequest>);
}

/// Tunables for [`ClientRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Coalescing window for persistence writes.
    pub flush_delay: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            flush_delay: DEFAULT_FLUSH_DELAY,
        }
    }
}

struct RegistryEntry {
    request: Arc<PutRequest>,
    global: bool,
}

struct Inner {
    entries: Mutex<HashMap<RequestIdentity, RegistryEntry>>,
    ticker: PriorityTicker,
    bus: EventBus,
    store: Option<RequestStore>,
    metrics: Metrics,
    settings: RegistrySettings,
}

impl Inner {
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<RequestIdentity, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn holds(&self, request: &Arc<PutRequest>) -> bool {
        self.lock_entries()
            .get(request.identity())
            .is_some_and(|entry| Arc::ptr_eq(&entry.request, request))
    }
}

/// Registry of live requests keyed by client scope and identifier.
///
/// Removing a request drops the registry's handle on it, which breaks the
/// request/registry reference cycle.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<Inner>,
}

impl ClientRegistry {
    /// Build a registry. Without a store, persistence requests are ignored.
    #[must_use]
    pub fn new(
        ticker: PriorityTicker,
        bus: EventBus,
        store: Option<RequestStore>,
        metrics: Metrics,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                ticker,
                bus,
                store,
                metrics,
                settings,
            }),
        }
    }

    /// Look up a live request.
    #[must_use]
    pub fn get(&self, identity: &RequestIdentity) -> Option<Arc<PutRequest>> {
        self.inner
            .lock_entries()
            .get(identity)
            .map(|entry| Arc::clone(&entry.request))
    }

    /// Requests owned by `client`, ordered by identifier.
    #[must_use]
    pub fn list(&self, client: &str) -> Vec<Arc<PutRequest>> {
        self.collect(|identity, _| identity.client == client)
    }

    /// Requests on the global queue, ordered by client then identifier.
    #[must_use]
    pub fn list_global(&self) -> Vec<Arc<PutRequest>> {
        self.collect(|_, entry| entry.global)
    }

    fn collect(
        &self,
        keep: impl Fn(&RequestIdentity, &RegistryEntry) -> bool,
    ) -> Vec<Arc<PutRequest>> {
        let mut found: Vec<(RequestIdentity, Arc<PutRequest>)> = self
            .inner
            .lock_entries()
            .iter()
            .filter(|(identity, entry)| keep(identity, entry))
            .map(|(identity, entry)| (identity.clone(), Arc::clone(&entry.request)))
            .collect();
        found.sort_by(|left, right| left.0.cmp(&right.0));
        found.into_iter().map(|(_, request)| request).collect()
    }

    /// Number of live requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock_entries().len()
    }

    /// Whether no request is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persistent store backing durable requests, if any.
    #[must_use]
    pub fn store(&self) -> Option<&RequestStore> {
        self.inner.store.as_ref()
    }

    /// Bus notifications are published on.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Remove a request: cancel it if running, release its data, delete its
    /// stored record and notify subscribers.
    pub async fn remove(&self, identity: &RequestIdentity) -> Option<Arc<PutRequest>> {
        let (entry, remaining) = {
            let mut entries = self.inner.lock_entries();
            let entry = entries.remove(identity)?;
            (entry, entries.len())
        };
        self.inner.metrics.set_active_requests(remaining);

        let request = entry.request;
        if !request.is_finished() {
            request.cancel().await;
        }
        request.free_data();
        if let Some(store) = &self.inner.store
            && let Err(err) = store.delete(identity).await
        {
            warn!(
                client = %identity.client,
                identifier = %identity.identifier,
                error = %err,
                "failed to delete persisted request"
            );
        }
        self.enqueue_notification(
            Event::RequestRemoved {
                client: identity.client.clone(),
                identifier: identity.identifier.clone(),
                global: entry.global,
            },
            Duration::ZERO,
        );
        info!(
            client = %identity.client,
            identifier = %identity.identifier,
            "request removed"
        );
        Some(request)
    }
}

impl RequestRegistry for ClientRegistry {
    fn register(&self, request: Arc<PutRequest>, global: bool) -> Result<(), CollisionError> {
        let mut entries = self.inner.lock_entries();
        match entries.entry(request.identity().clone()) {
            MapEntry::Occupied(slot) => Err(CollisionError {
                client: slot.key().client.clone(),
                identifier: slot.key().identifier.clone(),
            }),
            MapEntry::Vacant(slot) => {
                slot.insert(RegistryEntry { request, global });
                self.inner.metrics.set_active_requests(entries.len());
                Ok(())
            }
        }
    }

    fn enqueue_notification(&self, event: Event, delay: Duration) {
        let bus = self.inner.bus.clone();
        let metrics = self.inner.metrics.clone();
        let kind = event.kind();
        let scheduled = self.inner.ticker.schedule(
            async move {
                metrics.inc_notification(event.kind());
                match &event {
                    Event::PutSuccessful { .. } => metrics.inc_request(RequestOutcome::Succeeded),
                    Event::PutFailed { .. } => metrics.inc_request(RequestOutcome::Failed),
                    Event::PersistentPut(_) | Event::RequestRemoved { .. } => {}
                }
                bus.publish(event);
                Ok(())
            },
            delay,
        );
        if let Err(err) = scheduled {
            warn!(kind, error = %err, "notification dropped");
        }
    }

    fn persist(&self, request: &Arc<PutRequest>) {
        if !request.persistence().is_written_to_disk() {
            return;
        }
        let Some(store) = self.inner.store.clone() else {
            return;
        };
        let identity = request.identity().clone();
        let key = format!("persist:{}:{}", identity.client, identity.identifier);
        let inner = Arc::clone(&self.inner);
        let weak = Arc::downgrade(request);
        let scheduled = self.inner.ticker.schedule_deduped(
            async move {
                let Some(request) = weak.upgrade() else {
                    return Ok(());
                };
                if !inner.holds(&request) {
                    debug!(
                        identifier = %identity.identifier,
                        "request no longer registered; skipping write"
                    );
                    return Ok(());
                }
                let record = request.serialize();
                store.save(&record).await?;
                Ok(())
            },
            key,
            self.inner.settings.flush_delay,
        );
        match scheduled {
            Ok(ScheduleOutcome::Queued) => {}
            Ok(ScheduleOutcome::Merged { .. }) => {
                debug!(identifier = %request.identity().identifier, "persistence write coalesced");
            }
            Err(err) => warn!(error = %err, "persistence write dropped"),
        }
    }
}
