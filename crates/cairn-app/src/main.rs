#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Binary entrypoint that restores persisted inserts and keeps the engine
//! running until interrupted.

use cairn_app::{AppResult, run_app};

/// Bootstraps the insert engine and blocks until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}
