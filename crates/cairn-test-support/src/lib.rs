#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (parameter builders), mocks.rs (scripted inserter),
//! assert.rs (polling assertions).

pub mod assert;
pub mod fixtures;
pub mod mocks;

pub use assert::{eventually, eventually_within};
pub use fixtures::{chk_uri, put_params, ssk_uri};
pub use mocks::{InserterCall, InserterScript, ScriptedInserter, ScriptedInserterFactory};
