#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Engine-agnostic insert interfaces and domain types.
//!
//! Layout: `model/` (identity and parameters), `service/` (inserter
//! contract), `data/` (data handles and encrypted temp storage),
//! `resolver.rs` (upload intent to handle), `mime.rs` (content types),
//! `error.rs` (error taxonomy).

pub mod data;
pub mod error;
pub mod mime;
pub mod model;
pub mod resolver;
pub mod service;

pub use cairn_events::{DataSourceKind, PersistenceMode};
pub use data::{DataHandle, DataReader, ENVELOPE_OVERHEAD, TempFileRef, TempStore};
pub use error::{
    CollisionError, DescriptorError, InsertError, ModelError, PersistenceParseError,
    TempStoreError,
};
pub use mime::{DEFAULT_CONTENT_TYPE, guess_content_type, resolve_content_type};
pub use model::{
    DEFAULT_MAX_RETRIES, InsertUri, MAX_PRIORITY_CLASS, PriorityClass, PutFlags, PutParams,
    RequestIdentity,
};
pub use resolver::{RedirectDescriptor, ResolvedSource, UploadSource, resolve};
pub use service::{
    AttemptId, CompletionSink, InsertCompletion, InsertJob, Inserter, InserterFactory,
};
