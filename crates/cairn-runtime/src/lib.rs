#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Persistence layer for insert requests: the versioned record schema and
//! the directory of JSON files it is stored in.

pub mod codec;
pub mod store;

pub use codec::{PersistedPut, PersistedSource, PersistedTemp, SCHEMA_VERSION};
pub use store::{RequestStore, StoreError, StoredDocument};
