//! Typed configuration sections.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Complete engine configuration. Every section falls back to its defaults
/// when omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// On-disk locations.
    pub storage: StorageConfig,
    /// Scheduler sizing.
    pub ticker: TickerSettings,
    /// Record write behaviour.
    pub persistence: PersistenceSettings,
    /// Notification bus sizing.
    pub events: EventSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Built-in inserter behaviour.
    pub inserter: InserterSettings,
}

/// Directories used by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Persisted request records.
    pub state_dir: PathBuf,
    /// Encrypted temporary sources.
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(defaults::STATE_DIR),
            temp_dir: PathBuf::from(defaults::TEMP_DIR),
        }
    }
}

/// Scheduler sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TickerSettings {
    /// Upper bound on concurrently running job bodies.
    pub max_workers: usize,
}

impl Default for TickerSettings {
    fn default() -> Self {
        Self {
            max_workers: defaults::MAX_WORKERS,
        }
    }
}

/// Record write behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceSettings {
    /// Coalescing window, in milliseconds, for record writes.
    pub flush_delay_ms: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            flush_delay_ms: defaults::FLUSH_DELAY_MS,
        }
    }
}

impl PersistenceSettings {
    /// Coalescing window as a duration.
    #[must_use]
    pub const fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}

/// Notification bus sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventSettings {
    /// Notifications kept for late subscribers.
    pub replay_capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            replay_capacity: defaults::REPLAY_CAPACITY,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Level used when `RUST_LOG` is unset.
    pub level: String,
    /// `json`, `pretty` or `auto`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: defaults::LOG_FORMAT.to_string(),
        }
    }
}

/// Built-in inserter behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InserterSettings {
    /// Delay, in milliseconds, before an outcome is reported.
    pub completion_delay_ms: u64,
}

impl Default for InserterSettings {
    fn default() -> Self {
        Self {
            completion_delay_ms: defaults::COMPLETION_DELAY_MS,
        }
    }
}

impl InserterSettings {
    /// Completion delay as a duration.
    #[must_use]
    pub const fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }
}
