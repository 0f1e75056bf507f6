#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! File and environment backed engine configuration.
//!
//! Layout: `model.rs` (typed sections), `defaults.rs` (default values),
//! `loader.rs` (YAML file and environment overrides), `validate.rs`
//! (field checks), `error.rs`.

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    CONFIG_PATH_ENV, LOG_LEVEL_ENV, MAX_WORKERS_ENV, STATE_DIR_ENV, TEMP_DIR_ENV,
};
pub use model::{
    EngineConfig, EventSettings, InserterSettings, LoggingSettings, PersistenceSettings,
    StorageConfig, TickerSettings,
};
