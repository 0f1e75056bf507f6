//! Application-level errors for bootstrap.

use std::error::Error as StdError;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or validated.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: cairn_config::ConfigError,
    },
    /// Configuration value could not be mapped onto a runtime setting.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Field that failed to map.
        field: &'static str,
        /// Machine-readable reason.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Telemetry setup failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: Box<dyn StdError + Send + Sync>,
    },
    /// The request store could not be opened.
    #[error("request store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: cairn_runtime::StoreError,
    },
    /// The temporary source store could not be opened.
    #[error("temporary store operation failed")]
    TempStore {
        /// Operation identifier.
        operation: &'static str,
        /// Source temp store error.
        source: cairn_insert_core::TempStoreError,
    },
    /// Persisted requests could not be restored.
    #[error("request restore failed")]
    Restore {
        /// Operation identifier.
        operation: &'static str,
        /// Source load error.
        source: cairn_requests::LoadError,
    },
    /// Waiting for the shutdown signal failed.
    #[error("signal handling failed")]
    Signal {
        /// Source IO error.
        source: std::io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: cairn_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) fn telemetry(
        operation: &'static str,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Telemetry {
            operation,
            source: source.into(),
        }
    }

    pub(crate) const fn store(operation: &'static str, source: cairn_runtime::StoreError) -> Self {
        Self::Store { operation, source }
    }

    pub(crate) const fn temp_store(
        operation: &'static str,
        source: cairn_insert_core::TempStoreError,
    ) -> Self {
        Self::TempStore { operation, source }
    }

    pub(crate) const fn restore(operation: &'static str, source: cairn_requests::LoadError) -> Self {
        Self::Restore { operation, source }
    }
}
