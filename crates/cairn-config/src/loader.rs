//! Load configuration from YAML and apply environment overrides.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::model::EngineConfig;

/// Path of the YAML configuration file.
pub const CONFIG_PATH_ENV: &str = "CAIRN_CONFIG";
/// Override for `storage.state_dir`.
pub const STATE_DIR_ENV: &str = "CAIRN_STATE_DIR";
/// Override for `storage.temp_dir`.
pub const TEMP_DIR_ENV: &str = "CAIRN_TEMP_DIR";
/// Override for `logging.level`.
pub const LOG_LEVEL_ENV: &str = "CAIRN_LOG_LEVEL";
/// Override for `ticker.max_workers`.
pub const MAX_WORKERS_ENV: &str = "CAIRN_MAX_WORKERS";

impl EngineConfig {
    /// Read, parse and validate a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read,
    /// [`ConfigError::Parse`] when it is not a valid document and
    /// [`ConfigError::InvalidField`] when validation fails.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document without validating it. `origin` names the
    /// document in errors.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the document does not match the
    /// model.
    pub fn parse(document: &str, origin: &Path) -> ConfigResult<Self> {
        if document.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(document).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Build configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`EngineConfig::from_lookup`].
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from `lookup`: the file named by
    /// [`CONFIG_PATH_ENV`] (defaults when unset), then overrides, then
    /// validation.
    ///
    /// # Errors
    ///
    /// Returns any load, override or validation failure.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut config = match lookup(CONFIG_PATH_ENV).filter(|value| !value.is_empty()) {
            Some(path) => {
                info!(path = %path, "loading configuration file");
                Self::read(Path::new(&path))?
            }
            None => {
                debug!("no configuration file supplied; using defaults");
                Self::default()
            }
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply individual environment overrides on top of the loaded values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when an override cannot be
    /// parsed.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(dir) = lookup(STATE_DIR_ENV) {
            self.storage.state_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(TEMP_DIR_ENV) {
            self.storage.temp_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            self.logging.level = level;
        }
        if let Some(workers) = lookup(MAX_WORKERS_ENV) {
            self.ticker.max_workers = workers.trim().parse().map_err(|_| {
                ConfigError::invalid("ticker", "max_workers", Some(workers.clone()), "must be an integer")
            })?;
        }
        Ok(())
    }

    fn read(path: &Path) -> ConfigResult<Self> {
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            operation: "config.read",
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&document, path)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::parse("  \n", Path::new("inline")).expect("parse");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = EngineConfig::parse("ticker:\n  max_workers: 2\n", Path::new("inline"))
            .expect("parse");
        assert_eq!(config.ticker.max_workers, 2);
        assert_eq!(config.events, EngineConfig::default().events);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = EngineConfig::parse("ticker:\n  workers: 2\n", Path::new("inline"))
            .expect_err("unknown field");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn overrides_replace_loaded_values() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(lookup(&[
                (STATE_DIR_ENV, "/srv/state"),
                (TEMP_DIR_ENV, "/srv/temp"),
                (LOG_LEVEL_ENV, "debug"),
                (MAX_WORKERS_ENV, " 3 "),
            ]))
            .expect("overrides");
        assert_eq!(config.storage.state_dir, PathBuf::from("/srv/state"));
        assert_eq!(config.storage.temp_dir, PathBuf::from("/srv/temp"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.ticker.max_workers, 3);
    }

    #[test]
    fn non_numeric_worker_override_is_rejected() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(lookup(&[(MAX_WORKERS_ENV, "many")]))
            .expect_err("invalid override");
        assert!(matches!(
            err,
            ConfigError::InvalidField { ref field, reason: "must be an integer", .. } if field == "max_workers"
        ));
    }

    #[test]
    fn lookup_without_file_uses_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = EngineConfig::from_lookup(lookup(&[(CONFIG_PATH_ENV, "/definitely/missing.yaml")]))
            .expect_err("missing file");
        assert!(matches!(err, ConfigError::Io { operation: "config.read", .. }));
    }
}
