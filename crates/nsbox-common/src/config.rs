//! Runtime configuration model.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MONITOR_INTERVAL_MS, DEFAULT_RETIRED_CAPACITY, DEFAULT_STOP_POLL_INTERVAL_MS,
};
use crate::error::{NsboxError, Result};

/// Tunables for the process manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interval between two monitor passes, in milliseconds.
    pub monitor_interval_ms: u64,
    /// Polling interval for stop and wait operations, in milliseconds.
    pub stop_poll_interval_ms: u64,
    /// Number of swept records retained for late `process_info` queries.
    pub retired_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: DEFAULT_MONITOR_INTERVAL_MS,
            stop_poll_interval_ms: DEFAULT_STOP_POLL_INTERVAL_MS,
            retired_capacity: DEFAULT_RETIRED_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// Missing fields take their default value.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON,
    /// or holds an invalid value.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| NsboxError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every interval is non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.monitor_interval_ms == 0 {
            return Err(NsboxError::Config {
                message: "monitor_interval_ms must be greater than zero".into(),
            });
        }
        if self.stop_poll_interval_ms == 0 {
            return Err(NsboxError::Config {
                message: "stop_poll_interval_ms must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Returns the monitor interval.
    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Returns the stop/wait polling interval.
    #[must_use]
    pub const fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }
}
