//! Notification payload types carried across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to each event emitted by the engine.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Where the bytes of an insert come from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    /// Bytes staged by the caller in memory or engine-owned temp storage.
    Direct,
    /// A caller-owned file, read in place and never deleted by the engine.
    Disk,
    /// A generated descriptor pointing at another target identifier.
    Redirect,
}

impl DataSourceKind {
    /// Stable lower-case label used in persisted records and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Disk => "disk",
            Self::Redirect => "redirect",
        }
    }
}

/// How long a request outlives the connection that created it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    /// Lives only as long as the creating connection; never registered.
    ConnectionBound,
    /// Registered and queryable, but lost when the process exits.
    DurableVolatile,
    /// Registered and written to the request store; survives restarts.
    DurableRebootPersistent,
}

impl PersistenceMode {
    /// Stable lower-case label used in persisted records and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionBound => "connection_bound",
            Self::DurableVolatile => "durable_volatile",
            Self::DurableRebootPersistent => "durable_reboot_persistent",
        }
    }

    /// Whether requests in this mode are registered and announced.
    #[must_use]
    pub const fn is_registered(self) -> bool {
        !matches!(self, Self::ConnectionBound)
    }

    /// Whether requests in this mode are written to the request store.
    #[must_use]
    pub const fn is_written_to_disk(self) -> bool {
        matches!(self, Self::DurableRebootPersistent)
    }
}

/// Snapshot describing a persistent insert, emitted at registration and
/// again once the insert has started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PutNotice {
    /// Client scope owning the request.
    pub client: String,
    /// Caller-chosen request identifier, unique within the client scope.
    pub identifier: String,
    /// Target identifier pattern the data is inserted under.
    pub uri: String,
    /// Verbosity bitmask requested by the client.
    pub verbosity: u32,
    /// Priority class of the insert.
    pub priority_class: u8,
    /// Source the bytes come from.
    pub upload_from: DataSourceKind,
    /// Persistence mode of the request.
    pub persistence: PersistenceMode,
    /// Redirect target, for redirect inserts.
    pub target_uri: Option<String>,
    /// Original file name, for disk inserts.
    pub original_filename: Option<String>,
    /// Content type attached to the inserted data.
    pub content_type: Option<String>,
    /// Whether the request lives on the global queue.
    pub global: bool,
    /// Size of the data so far, in bytes.
    pub data_size: u64,
    /// Opaque token supplied by the client.
    pub client_token: Option<String>,
    /// Whether an insert attempt has been started.
    pub started: bool,
    /// Retry budget handed to the inserter.
    pub max_retries: i32,
    /// File name attached to the inserted data.
    pub target_filename: Option<String>,
}

/// Typed notifications surfaced to clients and observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Durable request snapshot ("tag" message).
    PersistentPut(PutNotice),
    /// The insert finished and produced its final identifier.
    PutSuccessful {
        /// Client scope owning the request.
        client: String,
        /// Request identifier.
        identifier: String,
        /// Identifier generated by the insert.
        final_uri: String,
        /// Whether the request lives on the global queue.
        global: bool,
    },
    /// The insert reached a terminal failure.
    PutFailed {
        /// Client scope owning the request.
        client: String,
        /// Request identifier.
        identifier: String,
        /// Machine-readable failure kind.
        code: String,
        /// Human-readable failure detail.
        detail: String,
        /// Whether retrying the same insert cannot help.
        fatal: bool,
        /// Whether the request lives on the global queue.
        global: bool,
    },
    /// The request was removed from the registry.
    RequestRemoved {
        /// Client scope owning the request.
        client: String,
        /// Request identifier.
        identifier: String,
        /// Whether the request lived on the global queue.
        global: bool,
    },
}

impl Event {
    /// Machine-friendly discriminator for subscribers and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PersistentPut(_) => "persistent_put",
            Self::PutSuccessful { .. } => "put_successful",
            Self::PutFailed { .. } => "put_failed",
            Self::RequestRemoved { .. } => "request_removed",
        }
    }

    /// Request identifier the event refers to.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::PersistentPut(notice) => &notice.identifier,
            Self::PutSuccessful { identifier, .. }
            | Self::PutFailed { identifier, .. }
            | Self::RequestRemoved { identifier, .. } => identifier,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice() -> PutNotice {
        PutNotice {
            client: "fproxy".into(),
            identifier: "upload-1".into(),
            uri: "CHK@".into(),
            verbosity: 0,
            priority_class: 2,
            upload_from: DataSourceKind::Disk,
            persistence: PersistenceMode::DurableRebootPersistent,
            target_uri: None,
            original_filename: Some("/srv/site/index.html".into()),
            content_type: Some("text/html".into()),
            global: false,
            data_size: 512,
            client_token: None,
            started: false,
            max_retries: 10,
            target_filename: Some("index.html".into()),
        }
    }

    #[test]
    fn event_kind_and_identifier_map_variants() {
        let put = Event::PersistentPut(notice());
        assert_eq!(put.kind(), "persistent_put");
        assert_eq!(put.identifier(), "upload-1");

        let failed = Event::PutFailed {
            client: "fproxy".into(),
            identifier: "upload-2".into(),
            code: "internal".into(),
            detail: "descriptor".into(),
            fatal: true,
            global: false,
        };
        assert_eq!(failed.kind(), "put_failed");
        assert_eq!(failed.identifier(), "upload-2");

        let removed = Event::RequestRemoved {
            client: "fproxy".into(),
            identifier: "upload-3".into(),
            global: true,
        };
        assert_eq!(removed.kind(), "request_removed");
    }

    #[test]
    fn persistent_put_serialises_with_type_tag() {
        let value = serde_json::to_value(Event::PersistentPut(notice())).expect("serialise");
        assert_eq!(value["type"], "persistent_put");
        assert_eq!(value["upload_from"], "disk");
        assert_eq!(value["persistence"], "durable_reboot_persistent");
    }

    #[test]
    fn persistence_mode_flags() {
        assert!(!PersistenceMode::ConnectionBound.is_registered());
        assert!(PersistenceMode::DurableVolatile.is_registered());
        assert!(!PersistenceMode::DurableVolatile.is_written_to_disk());
        assert!(PersistenceMode::DurableRebootPersistent.is_written_to_disk());
        assert_eq!(DataSourceKind::Redirect.as_str(), "redirect");
    }
}
