//! Prometheus-backed metrics registry and snapshot helpers.

use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Lifecycle step counted by `insert_requests_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A request record was created.
    Created,
    /// An insert attempt was started.
    Started,
    /// An insert finished successfully.
    Succeeded,
    /// An insert reached a terminal failure.
    Failed,
    /// A failed insert was restarted.
    Restarted,
}

impl RequestOutcome {
    /// Label value used for the `outcome` dimension.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Restarted => "restarted",
        }
    }
}

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    insert_requests_total: IntCounterVec,
    notifications_emitted_total: IntCounterVec,
    active_requests: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Requests currently held by the registry.
    pub active_requests: i64,
    /// Inserts that finished successfully.
    pub succeeded_total: u64,
    /// Inserts that reached a terminal failure.
    pub failed_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let insert_requests_total = IntCounterVec::new(
            Opts::new(
                "insert_requests_total",
                "Insert request lifecycle steps by outcome",
            ),
            &["outcome"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "insert_requests_total",
            source,
        })?;
        let notifications_emitted_total = IntCounterVec::new(
            Opts::new(
                "notifications_emitted_total",
                "Client notifications emitted by type",
            ),
            &["type"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "notifications_emitted_total",
            source,
        })?;
        let active_requests = IntGauge::with_opts(Opts::new(
            "active_requests",
            "Requests currently held by the registry",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "active_requests",
            source,
        })?;

        registry
            .register(Box::new(insert_requests_total.clone()))
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "insert_requests_total",
                source,
            })?;
        registry
            .register(Box::new(notifications_emitted_total.clone()))
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "notifications_emitted_total",
                source,
            })?;
        registry
            .register(Box::new(active_requests.clone()))
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "active_requests",
                source,
            })?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                insert_requests_total,
                notifications_emitted_total,
                active_requests,
            }),
        })
    }

    /// Count one request lifecycle step.
    pub fn inc_request(&self, outcome: RequestOutcome) {
        self.inner
            .insert_requests_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Count one emitted notification of `kind`.
    pub fn inc_notification(&self, kind: &str) {
        self.inner
            .notifications_emitted_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Set the active request gauge.
    pub fn set_active_requests(&self, count: usize) {
        self.inner
            .active_requests
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let count = |outcome: RequestOutcome| {
            self.inner
                .insert_requests_total
                .with_label_values(&[outcome.as_str()])
                .get()
        };
        MetricsSnapshot {
            active_requests: self.inner.active_requests.get(),
            succeeded_total: count(RequestOutcome::Succeeded),
            failed_total: count(RequestOutcome::Failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_request(RequestOutcome::Created);
        metrics.inc_request(RequestOutcome::Succeeded);
        metrics.inc_request(RequestOutcome::Failed);
        metrics.inc_request(RequestOutcome::Failed);
        metrics.inc_notification("persistent_put");
        metrics.set_active_requests(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_requests, 3);
        assert_eq!(snapshot.succeeded_total, 1);
        assert_eq!(snapshot.failed_total, 2);

        let rendered = metrics.render()?;
        assert!(rendered.contains("insert_requests_total{outcome=\"created\"} 1"));
        assert!(rendered.contains("notifications_emitted_total{type=\"persistent_put\"} 1"));
        assert!(rendered.contains("active_requests 3"));
        Ok(())
    }

    #[test]
    fn snapshot_serialises() -> Result<()> {
        let metrics = Metrics::new()?;
        let value = serde_json::to_value(metrics.snapshot()).expect("serialise");
        assert_eq!(value["active_requests"], 0);
        Ok(())
    }
}
