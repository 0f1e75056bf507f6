//! Shared wiring for request integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cairn_events::{Event, EventBus};
use cairn_insert_core::TempStore;
use cairn_requests::{ClientRegistry, PutService, RegistrySettings};
use cairn_runtime::RequestStore;
use cairn_telemetry::Metrics;
use cairn_test_support::ScriptedInserterFactory;
use cairn_ticker::{PriorityTicker, TickerConfig};
use tempfile::TempDir;

pub struct Harness {
    _dir: Option<TempDir>,
    pub root: PathBuf,
    pub ticker: PriorityTicker,
    pub bus: EventBus,
    pub metrics: Metrics,
    pub factory: Arc<ScriptedInserterFactory>,
    pub store: RequestStore,
    pub temp_store: TempStore,
    pub service: PutService,
}

impl Harness {
    pub fn new() -> Result<Self> {
        Self::with_factory(ScriptedInserterFactory::new())
    }

    pub fn with_factory(factory: Arc<ScriptedInserterFactory>) -> Result<Self> {
        Self::with_flush_delay(factory, Duration::from_millis(20))
    }

    pub fn with_flush_delay(
        factory: Arc<ScriptedInserterFactory>,
        flush_delay: Duration,
    ) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().to_path_buf();
        let mut harness = Self::at(&root, factory, flush_delay)?;
        harness._dir = Some(dir);
        Ok(harness)
    }

    /// A second engine over the same state directories.
    pub fn reopen(&self) -> Result<Self> {
        Self::at(
            &self.root,
            ScriptedInserterFactory::new(),
            Duration::from_millis(20),
        )
    }

    fn at(root: &Path, factory: Arc<ScriptedInserterFactory>, flush_delay: Duration) -> Result<Self> {
        let ticker = PriorityTicker::spawn(TickerConfig::default());
        let bus = EventBus::new();
        let metrics = Metrics::new()?;
        let store = RequestStore::open(root.join("requests"))?;
        let temp_store = TempStore::open(root.join("temp"))?;
        let registry = ClientRegistry::new(
            ticker.clone(),
            bus.clone(),
            Some(store.clone()),
            metrics.clone(),
            RegistrySettings { flush_delay },
        );
        let service = PutService::new(
            registry,
            factory.clone(),
            temp_store.clone(),
            metrics.clone(),
        );
        Ok(Self {
            _dir: None,
            root: root.to_path_buf(),
            ticker,
            bus,
            metrics,
            factory,
            store,
            temp_store,
            service,
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.bus
            .backlog_since(0)
            .into_iter()
            .map(|envelope| envelope.event)
            .collect()
    }

    pub fn count_events(&self, kind: &str) -> usize {
        self.events().iter().filter(|event| event.kind() == kind).count()
    }

    pub fn temp_files(&self) -> usize {
        std::fs::read_dir(self.temp_store.dir())
            .map(|entries| entries.filter_map(Result::ok).count())
            .unwrap_or(0)
    }
}
