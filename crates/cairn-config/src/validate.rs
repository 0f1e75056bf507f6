//! Field checks applied after loading.

use std::path::Path;

use crate::defaults::LOG_FORMATS;
use crate::error::{ConfigError, ConfigResult};
use crate::model::EngineConfig;

impl EngineConfig {
    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::InvalidField`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        require_dir(&self.storage.state_dir, "storage", "state_dir")?;
        require_dir(&self.storage.temp_dir, "storage", "temp_dir")?;
        if self.storage.state_dir == self.storage.temp_dir {
            return Err(ConfigError::invalid(
                "storage",
                "temp_dir",
                Some(self.storage.temp_dir.display().to_string()),
                "must differ from state_dir",
            ));
        }
        if self.ticker.max_workers == 0 {
            return Err(ConfigError::invalid(
                "ticker",
                "max_workers",
                Some("0".into()),
                "must be positive",
            ));
        }
        if self.events.replay_capacity == 0 {
            return Err(ConfigError::invalid(
                "events",
                "replay_capacity",
                Some("0".into()),
                "must be positive",
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid(
                "logging",
                "level",
                None,
                "must not be empty",
            ));
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::invalid(
                "logging",
                "format",
                Some(self.logging.format.clone()),
                "must be one of json, pretty, auto",
            ));
        }
        Ok(())
    }
}

fn require_dir(path: &Path, section: &str, field: &str) -> ConfigResult<()> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::invalid(section, field, None, "must not be empty"));
    }
    Ok(())
}
