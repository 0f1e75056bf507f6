use std::sync::Arc;

use cairn_config::EngineConfig;
use cairn_events::EventBus;
use cairn_insert_core::TempStore;
use cairn_requests::{ClientRegistry, PutService, RegistrySettings, RestoreReport};
use cairn_runtime::RequestStore;
use cairn_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics, record_app_mode};
use cairn_ticker::{PriorityTicker, TickerConfig};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::loopback::LoopbackInserterFactory;

/// Running engine: scheduler, notification bus, metrics and put service.
pub struct Engine {
    config: EngineConfig,
    ticker: PriorityTicker,
    bus: EventBus,
    metrics: Metrics,
    service: PutService,
}

impl Engine {
    /// Wire every service from `config` and restore persisted requests.
    ///
    /// # Errors
    ///
    /// Returns an error when metrics, the stores or the restore pass fail.
    pub async fn start(config: EngineConfig) -> AppResult<(Self, RestoreReport)> {
        let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        let ticker = PriorityTicker::spawn(TickerConfig {
            max_workers: config.ticker.max_workers,
        });
        let bus = EventBus::with_capacity(config.events.replay_capacity);
        let store = RequestStore::open(&config.storage.state_dir)
            .map_err(|err| AppError::store("request_store.open", err))?;
        let temp_store = TempStore::open(&config.storage.temp_dir)
            .map_err(|err| AppError::temp_store("temp_store.open", err))?;

        let registry = ClientRegistry::new(
            ticker.clone(),
            bus.clone(),
            Some(store),
            metrics.clone(),
            RegistrySettings {
                flush_delay: config.persistence.flush_delay(),
            },
        );
        let factory = Arc::new(LoopbackInserterFactory::new(
            ticker.clone(),
            config.inserter.completion_delay(),
        ));
        let service = PutService::new(registry, factory, temp_store, metrics.clone());

        let report = service
            .restore_persisted()
            .await
            .map_err(|err| AppError::restore("put_service.restore_persisted", err))?;

        Ok((
            Self {
                config,
                ticker,
                bus,
                metrics,
                service,
            },
            report,
        ))
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Put service for submitting and managing requests.
    #[must_use]
    pub const fn service(&self) -> &PutService {
        &self.service
    }

    /// Notification bus.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Metrics registry.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Stop the scheduler. Pending notifications and writes are dropped.
    pub fn shutdown(&self) {
        self.ticker.shutdown();
        info!(
            active_requests = self.metrics.snapshot().active_requests,
            "engine stopped"
        );
    }
}

/// Entry point for the boot sequence: load configuration, install logging,
/// restore persisted requests and run until interrupted.
///
/// # Errors
///
/// Returns an error if configuration, logging, engine start or signal
/// handling fails.
pub async fn run_app() -> AppResult<()> {
    let config = EngineConfig::from_env().map_err(|err| AppError::config("config.from_env", err))?;
    let format = LogFormat::from_name(&config.logging.format).ok_or_else(|| {
        AppError::InvalidConfig {
            field: "logging.format",
            reason: "unknown",
            value: Some(config.logging.format.clone()),
        }
    })?;
    cairn_telemetry::init_logging(&LoggingConfig {
        level: &config.logging.level,
        format,
        build_sha: option_env!("CAIRN_BUILD_SHA").unwrap_or("dev"),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("bootstrap");

    info!(
        state_dir = %config.storage.state_dir.display(),
        temp_dir = %config.storage.temp_dir.display(),
        "insert engine bootstrap starting"
    );
    let (engine, report) = Engine::start(config).await?;
    info!(
        restored = report.restored,
        started = report.started,
        skipped = report.skipped,
        "insert engine ready"
    );
    record_app_mode("running");

    let notifications = spawn_notification_log(engine.bus());
    let signal = tokio::signal::ctrl_c().await;

    notifications.abort();
    engine.shutdown();
    match engine.metrics().render() {
        Ok(rendered) => debug!(metrics = %rendered, "final metrics"),
        Err(err) => warn!(error = %err, "failed to render metrics"),
    }
    signal.map_err(|source| AppError::Signal { source })
}

fn spawn_notification_log(bus: &EventBus) -> JoinHandle<()> {
    let mut stream = bus.subscribe();
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            match item {
                Ok(envelope) => debug!(
                    id = envelope.id,
                    kind = envelope.event.kind(),
                    identifier = envelope.event.identifier(),
                    "notification"
                ),
                Err(err) => warn!(error = %err, "notification stream lagged"),
            }
        }
    })
}
