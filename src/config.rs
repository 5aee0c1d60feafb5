//! Configuration loading and management.

use crate::error::Result;
use crate::model::ChatMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat backend base URL.
    #[serde(alias = "baseUrl")]
    pub base_url: String,

    /// Seconds without stream data before a turn is failed locally.
    #[serde(alias = "idleTimeoutSecs")]
    pub idle_timeout_secs: u64,

    /// Override for the session store file location.
    #[serde(alias = "sessionsPath")]
    pub sessions_path: Option<PathBuf>,

    /// Mode given to sessions created without an explicit one.
    #[serde(alias = "defaultMode")]
    pub default_mode: ChatMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            idle_timeout_secs: 60,
            sessions_path: None,
            default_mode: ChatMode::Research,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
