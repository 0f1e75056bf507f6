#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Insert engine bootstrap wiring.
//!
//! Layout: `bootstrap.rs` (service wiring and boot sequence), `loopback.rs`
//! (built-in inserter), `error.rs`.

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Application-level errors.
pub mod error;
/// Built-in inserter that completes locally.
pub mod loopback;

pub use bootstrap::{Engine, run_app};
pub use error::{AppError, AppResult};
pub use loopback::{LoopbackInserter, LoopbackInserterFactory};
