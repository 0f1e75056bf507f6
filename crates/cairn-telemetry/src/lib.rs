#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Telemetry primitives shared across the cairn workspace.
//!
//! This crate centralises logging setup, the process-wide application span,
//! and the Prometheus registry so every crate reports the same way.
//! Layout: `init.rs` (subscriber), `context.rs` (span guard), `metrics.rs`
//! (collectors), `error.rs` (failures).

pub mod context;
pub mod error;
pub mod init;
pub mod metrics;

pub use context::{GlobalContextGuard, record_app_mode};
pub use error::{Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{Metrics, MetricsSnapshot, RequestOutcome};
