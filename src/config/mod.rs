//! Configuration module
//!
//! Handles loading and managing runner configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which failing tests the reporting side auto-expands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShowDetail {
    /// Only the first failing test.
    FirstFail,
    /// Every failing test.
    Failed,
    /// None.
    Never,
}

/// Runner configuration, mutable until the run starts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Per-test timeout in milliseconds
    pub timeout: u64,

    /// Start the run automatically once the host environment is ready.
    /// Consumed by embedding glue, not by the engine itself.
    pub autostart: bool,

    /// Failure detail expansion policy for the reporting side
    pub show_detail: ShowDetail,

    /// Disable the timeout race and exception containment; body failures
    /// propagate to the caller. Useful under a debugger.
    pub notrycatch: bool,

    /// Stop the whole run on the first failing test
    pub fail_fast: bool,

    /// Reject tests declared outside any suite
    pub no_standalone_test: bool,

    /// Shuffle batch and suite-children order during the walk
    pub random_order: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: 10_000,
            autostart: false,
            show_detail: ShowDetail::FirstFail,
            notrycatch: false,
            fail_fast: false,
            no_standalone_test: false,
            random_order: false,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Self = if path
            .as_ref()
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
        {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = if path
            .as_ref()
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
        {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }
}
