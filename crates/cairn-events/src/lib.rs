#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Notification bus for the insert engine.
//!
//! The bus provides a typed event enum, sequential identifiers, and a bounded
//! replay buffer so late subscribers can catch up on recent notifications.
//! Internally it uses `tokio::broadcast`; when the channel overflows, the
//! oldest events are dropped.
//!
//! Layout: `payloads.rs` (event and shared enum types), `routing.rs` (bus).

pub mod payloads;
pub mod routing;

pub use payloads::{
    DEFAULT_REPLAY_CAPACITY, DataSourceKind, Event, EventEnvelope, EventId, PersistenceMode,
    PutNotice,
};
pub use routing::{EventBus, EventStream};
