#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Persistent insert requests.
//!
//! Layout: `put.rs` (request state machine and durable form), `registry.rs`
//! (client scopes, notifications, coalesced writes), `service.rs`
//! (submission and startup restore), `error.rs`.

pub mod error;
pub mod put;
pub mod registry;
pub mod service;

pub use error::{LoadError, RestoreError, SubmitError};
pub use put::{PutRequest, PutStatus};
pub use registry::{ClientRegistry, DEFAULT_FLUSH_DELAY, RegistrySettings, RequestRegistry};
pub use service::{PutService, PutSubmission, RestoreReport, Upload};
