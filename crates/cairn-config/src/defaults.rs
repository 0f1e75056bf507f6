//! Default values for engine configuration.

/// Directory holding persisted request records.
pub(crate) const STATE_DIR: &str = "./data/requests";
/// Directory holding encrypted temporary sources.
pub(crate) const TEMP_DIR: &str = "./data/temp";
/// Concurrent scheduler job bodies.
pub(crate) const MAX_WORKERS: usize = 8;
/// Coalescing window for record writes.
pub(crate) const FLUSH_DELAY_MS: u64 = 250;
/// Notifications kept for late subscribers.
pub(crate) const REPLAY_CAPACITY: usize = 1_024;
/// Log level used when `RUST_LOG` is unset.
pub(crate) const LOG_LEVEL: &str = "info";
/// Log output format.
pub(crate) const LOG_FORMAT: &str = "auto";
/// Delay before the loopback inserter reports an outcome.
pub(crate) const COMPLETION_DELAY_MS: u64 = 50;

/// Accepted values for `logging.format`.
pub const LOG_FORMATS: [&str; 3] = ["json", "pretty", "auto"];
